//! Compensating transactions.
//!
//! A [`Transaction`] records each operation together with the action that
//! undoes it. Commit keeps the effects; rollback runs the undo actions newest
//! first, carrying on past failures and reporting every one of them.
//! Savepoints undo just the tail of the log and leave the transaction open.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │     (Hands out transactions, tracks pending ones, run())    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Transaction                           │
//! │  status ─ operation log ─ hooks ─ observer ─ logger         │
//! └─────────────────────────────────────────────────────────────┘
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   Hooks     │       │   Retry     │       │  Recover    │
//!  │ (veto/log)  │       │ (backoff)   │       │  (panics)   │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use atom::context::Context;
//! use atom::transaction::{Compensation, Transaction};
//! use atom::BoxError;
//!
//! let ctx = Context::background();
//! let tx = Transaction::new();
//!
//! tx.do_op(
//!     &ctx,
//!     "create-file",
//!     |_: &Context| Ok::<(), BoxError>(()),
//!     Some(Compensation::new(|_: &Context| Ok::<(), BoxError>(()))),
//! )?;
//! tx.do_op(&ctx, "send-email", |_: &Context| Ok::<(), BoxError>(()), None)?;
//!
//! // Undo "create-file"; "send-email" has nothing to undo.
//! tx.rollback(&ctx)?;
//! # Ok::<(), atom::transaction::TransactionError>(())
//! ```

mod config;
mod context;
mod error;
mod manager;
mod record;
mod savepoint;

#[cfg(test)]
mod tests;

pub use config::{DoOptions, TransactionConfig};
pub use context::{Transaction, TransactionStatus};
pub use error::{
    CompensationFailure, RollbackError, SavepointFault, TransactionError, TransactionResult,
};
pub use manager::TransactionManager;
pub use record::{Compensation, HistoryEntry};
pub use savepoint::Savepoint;
