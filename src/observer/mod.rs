//! Passive notification sinks.
//!
//! An [`Observer`] hears about every operation, commit and rollback but has
//! no say in the outcome. Notifications run inline, so implementations must
//! be quick. A panicking observer is contained by the transaction and
//! reported through its logger.

pub(crate) mod logger;
mod metrics;
mod trace;

use std::error::Error;
use std::time::Duration;

use crate::transaction::CompensationFailure;

pub use logger::{Logger, TracingLogger};
pub use metrics::{MetricsObserver, MetricsSnapshot};
pub use trace::TracingObserver;

/// Receives transaction events. Every method defaults to doing nothing.
pub trait Observer: Send + Sync {
    /// An operation is about to run.
    fn on_operation_start(&self, name: &str) {
        let _ = name;
    }

    /// An operation returned (or panicked, in which case `err` is a
    /// [`PanicError`](crate::recover::PanicError)).
    fn on_operation_end(&self, name: &str, duration: Duration, err: Option<&(dyn Error + 'static)>) {
        let _ = (name, duration, err);
    }

    /// The transaction committed.
    fn on_commit(&self) {}

    /// A full rollback finished; `failures` lists every compensation that
    /// could not be completed.
    fn on_rollback(&self, failures: &[CompensationFailure]) {
        let _ = failures;
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}
