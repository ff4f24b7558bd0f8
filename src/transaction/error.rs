//! Transaction error types.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::context::ContextError;
use crate::hooks::HookError;
use crate::recover::PanicError;
use crate::transaction::context::TransactionStatus;
use crate::BoxError;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The transaction already committed.
    #[error("transaction {tx_id} is already committed")]
    AlreadyCommitted { tx_id: String },

    /// The transaction already rolled back.
    #[error("transaction {tx_id} is already rolled back")]
    AlreadyRolledBack { tx_id: String },

    /// A commit or rollback is running; no new operation may start.
    #[error("transaction {tx_id} is busy ({status})")]
    LifecycleInProgress {
        tx_id: String,
        status: TransactionStatus,
    },

    /// A user operation returned an error or panicked.
    #[error("operation {name:?} failed: {source}")]
    Operation {
        name: String,
        #[source]
        source: BoxError,
    },

    /// A critical hook vetoed the call.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// One or more compensations failed during a rollback.
    #[error(transparent)]
    Rollback(#[from] RollbackError),

    /// The savepoint cannot be used with this transaction.
    #[error("invalid savepoint {name:?}: {reason}")]
    InvalidSavepoint {
        name: String,
        reason: SavepointFault,
    },

    /// The caller's context was cancelled or expired.
    #[error("context error: {0}")]
    Context(#[from] ContextError),
}

impl TransactionError {
    /// Already committed or already rolled back.
    pub fn is_terminal_state(&self) -> bool {
        matches!(
            self,
            TransactionError::AlreadyCommitted { .. } | TransactionError::AlreadyRolledBack { .. }
        )
    }

    pub fn is_already_committed(&self) -> bool {
        matches!(self, TransactionError::AlreadyCommitted { .. })
    }

    pub fn is_already_rolled_back(&self) -> bool {
        matches!(self, TransactionError::AlreadyRolledBack { .. })
    }

    /// Check if retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransactionError::LifecycleInProgress { .. } | TransactionError::Context(_)
        )
    }

    /// The recovered panic somewhere in this error's cause chain, if any.
    pub fn panic(&self) -> Option<&PanicError> {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(panic) = err.downcast_ref::<PanicError>() {
                return Some(panic);
            }
            current = err.source();
        }
        None
    }

    /// Compensation failures carried by a rollback error.
    pub fn rollback_failures(&self) -> &[CompensationFailure] {
        match self {
            TransactionError::Rollback(err) => err.failures(),
            _ => &[],
        }
    }
}

/// Why a savepoint was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SavepointFault {
    /// Created by a different transaction.
    #[error("belongs to transaction {owner}")]
    ForeignTransaction { owner: String },

    /// Points past the end of the (already truncated) operation log.
    #[error("index {index} is beyond the {len} recorded operation(s)")]
    Stale { index: usize, len: usize },
}

/// A compensation that could not be completed.
#[derive(Debug, Error)]
#[error("compensation for operation {operation:?} (#{index}) failed: {source}")]
pub struct CompensationFailure {
    /// Position of the operation in the log.
    pub index: usize,
    /// Name of the operation being undone.
    pub operation: String,
    /// The compensation's error, a [`RetryError`](crate::retry::RetryError)
    /// or a [`PanicError`].
    #[source]
    pub source: BoxError,
}

/// Every compensation failure from one rollback pass, in the order the
/// compensations ran (newest operation first).
#[derive(Debug)]
pub struct RollbackError {
    failures: Vec<CompensationFailure>,
}

impl RollbackError {
    pub(crate) fn new(failures: Vec<CompensationFailure>) -> Self {
        Self { failures }
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[CompensationFailure] {
        &self.failures
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CompensationFailure> {
        self.failures.iter()
    }

    pub fn into_failures(self) -> Vec<CompensationFailure> {
        self.failures
    }
}

impl fmt::Display for RollbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rollback finished with {} compensation failure(s)", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, failure)?;
        }
        Ok(())
    }
}

impl StdError for RollbackError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.failures.first().map(|f| f as &(dyn StdError + 'static))
    }
}

impl<'a> IntoIterator for &'a RollbackError {
    type Item = &'a CompensationFailure;
    type IntoIter = std::slice::Iter<'a, CompensationFailure>;

    fn into_iter(self) -> Self::IntoIter {
        self.failures.iter()
    }
}
