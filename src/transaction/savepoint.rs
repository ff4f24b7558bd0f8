//! Savepoints: named positions in the operation log.

use std::fmt;

use chrono::{DateTime, Utc};

/// A position in one transaction's operation log.
///
/// Only the transaction that created it accepts it. A savepoint whose
/// position was cut away by an earlier partial rollback is rejected only if
/// it now points past the end of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    pub(crate) name: String,
    pub(crate) index: usize,
    pub(crate) tx_id: String,
    pub(crate) created_at: DateTime<Utc>,
}

impl Savepoint {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of operations recorded when the savepoint was taken.
    pub fn index(&self) -> usize {
        self.index
    }

    /// ID of the owning transaction.
    pub fn transaction_id(&self) -> &str {
        &self.tx_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Display for Savepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} (tx {})", self.name, self.index, self.tx_id)
    }
}
