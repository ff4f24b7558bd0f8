//! Panic-recovery boundary.
//!
//! Every user-supplied callback (operation, compensation, hook, observer) is
//! invoked through [`recover`], so a panic inside caller code turns into a
//! [`PanicError`] instead of unwinding through the transaction's locks and
//! counters.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::BoxError;

/// A panic recovered from a user callback.
#[derive(Debug, Error)]
#[error("panic: {value}")]
pub struct PanicError {
    value: String,
    backtrace: String,
}

impl PanicError {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let value = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };

        Self {
            value,
            backtrace: Backtrace::force_capture().to_string(),
        }
    }

    /// The panic payload, rendered as text.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Stack trace captured where the panic was recovered.
    pub fn backtrace(&self) -> &str {
        &self.backtrace
    }
}

/// Run `f`, converting a panic into a [`PanicError`].
pub fn recover<T, F>(f: F) -> Result<T, PanicError>
where
    F: FnOnce() -> T,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(PanicError::from_payload)
}

/// Run a fallible callback; a panic becomes a boxed [`PanicError`].
pub(crate) fn guard<F>(f: F) -> Result<(), BoxError>
where
    F: FnOnce() -> Result<(), BoxError>,
{
    match recover(f) {
        Ok(result) => result,
        Err(panic) => Err(Box::new(panic)),
    }
}
