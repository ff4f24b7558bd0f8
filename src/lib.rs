//! Atom - compensating transactions for side effects that can't be undone
//! by a database.
//!
//! Each operation is recorded with a compensation that undoes it. Committing
//! keeps everything; rolling back runs the compensations newest first and
//! reports every one that failed. On top of that come savepoints, retry with
//! exponential backoff for compensations, lifecycle and per-operation hooks,
//! observers, and panic containment for all user callbacks.
//!
//! # Example
//!
//! ```
//! use atom::context::Context;
//! use atom::transaction::{Compensation, TransactionManager, TransactionResult};
//! use atom::BoxError;
//!
//! let ctx = Context::background();
//! let manager = TransactionManager::default();
//!
//! let result: TransactionResult<()> = manager.run(&ctx, |tx| {
//!     tx.do_op(
//!         &ctx,
//!         "reserve-seat",
//!         |_: &Context| Ok::<(), BoxError>(()),
//!         Some(Compensation::new(|_: &Context| Ok::<(), BoxError>(()))),
//!     )?;
//!     tx.do_op(&ctx, "charge-card", |_: &Context| Err::<(), _>("declined"), None)?;
//!     Ok(())
//! });
//!
//! // The charge failed, so the seat reservation was released.
//! assert!(result.is_err());
//! ```

pub mod context;
pub mod hooks;
pub mod observer;
pub mod recover;
pub mod retry;
pub mod transaction;

/// Error type returned by operations, compensations and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub use context::Context;
pub use transaction::{Compensation, Transaction, TransactionError, TransactionManager};
