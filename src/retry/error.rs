//! Retry error types.

use thiserror::Error;

use crate::context::ContextError;
use crate::BoxError;

/// A compensation that kept failing under its retry policy.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every allowed attempt failed.
    #[error("compensation failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: BoxError,
    },

    /// The context ended during a backoff wait; `source` is the last failure.
    #[error("compensation retry stopped after {attempts} attempt(s) ({cause}): {source}")]
    Interrupted {
        attempts: u32,
        cause: ContextError,
        #[source]
        source: BoxError,
    },
}

impl RetryError {
    /// Number of times the compensation ran.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Interrupted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The error from the last attempt.
    pub fn last_error(&self) -> &BoxError {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Interrupted { source, .. } => source,
        }
    }
}
