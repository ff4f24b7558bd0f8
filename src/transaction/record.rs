//! Operation log entries.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::context::Context;
use crate::retry::RetryPolicy;
use crate::BoxError;

type CompensateFn = dyn Fn(&Context) -> Result<(), BoxError> + Send + Sync;

/// An undo action for one operation.
///
/// May run more than once when a retry policy is attached, so it should be
/// safe to repeat.
#[derive(Clone)]
pub struct Compensation(Arc<CompensateFn>);

impl Compensation {
    pub fn new<F, E>(f: F) -> Self
    where
        F: Fn(&Context) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self(Arc::new(move |ctx: &Context| f(ctx).map_err(Into::into)))
    }

    pub(crate) fn call(&self, ctx: &Context) -> Result<(), BoxError> {
        (self.0)(ctx)
    }
}

impl fmt::Debug for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Compensation(..)")
    }
}

/// One executed operation. Appended once per `do_op`, never modified.
#[derive(Debug, Clone)]
pub(crate) struct OperationRecord {
    pub(crate) name: String,
    pub(crate) compensate: Option<Compensation>,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) executed_at: DateTime<Utc>,
    pub(crate) duration: Duration,
    pub(crate) error: Option<String>,
}

/// Read-only view of an operation record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Position in the operation log.
    pub index: usize,
    pub name: String,
    pub executed_at: DateTime<Utc>,
    pub duration: Duration,
    /// Display text of the operation's error, if it failed.
    pub error: Option<String>,
    pub has_compensation: bool,
    pub retry_policy: Option<RetryPolicy>,
}

impl HistoryEntry {
    pub(crate) fn from_record(index: usize, record: &OperationRecord) -> Self {
        Self {
            index,
            name: record.name.clone(),
            executed_at: record.executed_at,
            duration: record.duration,
            error: record.error.clone(),
            has_compensation: record.compensate.is_some(),
            retry_policy: record.retry.clone(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}
