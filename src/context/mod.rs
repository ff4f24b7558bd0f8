//! Cancellation contexts.
//!
//! Every blocking wait inside the engine (an operation's timeout, the
//! quiescence wait of commit/rollback, compensation backoff) is driven by a
//! [`Context`]. Operations and compensations receive the context too and are
//! expected to check it cooperatively; nothing is interrupted forcibly.
//!
//! ```text
//!  background ──► with_cancel ──► with_timeout(5s) ──► handed to the operation
//!                     │
//!                 CancelHandle::cancel() wakes every sleeper below it
//! ```

mod error;
mod token;

pub use error::{ContextError, ContextResult};
pub use token::{CancelHandle, Context};
