//! Context error types.

use thiserror::Error;

/// Result type for context-aware waits.
pub type ContextResult<T> = Result<T, ContextError>;

/// Why a [`Context`](super::Context) is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context (or one of its ancestors) was cancelled explicitly.
    #[error("context canceled")]
    Canceled,

    /// The context's deadline (or an ancestor's) has passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl ContextError {
    /// Check if this error came from a deadline rather than a cancel call.
    pub fn is_deadline(&self) -> bool {
        matches!(self, ContextError::DeadlineExceeded)
    }
}
