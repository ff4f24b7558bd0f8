//! Counting observer.

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::observer::Observer;
use crate::transaction::CompensationFailure;

/// Observer that keeps running totals.
#[derive(Debug, Default)]
pub struct MetricsObserver {
    operations_started: AtomicU64,
    operations_succeeded: AtomicU64,
    operations_failed: AtomicU64,
    operation_nanos: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    rollbacks_with_failures: AtomicU64,
    compensation_failures: AtomicU64,
}

/// Point-in-time copy of a [`MetricsObserver`]'s counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub operations_started: u64,
    pub operations_succeeded: u64,
    pub operations_failed: u64,
    pub total_operation_time: Duration,
    pub commits: u64,
    pub rollbacks: u64,
    pub rollbacks_with_failures: u64,
    pub compensation_failures: u64,
}

impl MetricsSnapshot {
    /// Fraction of finished operations that succeeded (1.0 when none ran).
    pub fn success_rate(&self) -> f64 {
        let finished = self.operations_succeeded + self.operations_failed;
        if finished == 0 {
            1.0
        } else {
            self.operations_succeeded as f64 / finished as f64
        }
    }
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations_started: self.operations_started.load(Ordering::Relaxed),
            operations_succeeded: self.operations_succeeded.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
            total_operation_time: Duration::from_nanos(self.operation_nanos.load(Ordering::Relaxed)),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            rollbacks_with_failures: self.rollbacks_with_failures.load(Ordering::Relaxed),
            compensation_failures: self.compensation_failures.load(Ordering::Relaxed),
        }
    }
}

impl Observer for MetricsObserver {
    fn on_operation_start(&self, _name: &str) {
        self.operations_started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_operation_end(&self, _name: &str, duration: Duration, err: Option<&(dyn Error + 'static)>) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .operation_nanos
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |total| {
                Some(total.saturating_add(nanos))
            });
        if err.is_some() {
            self.operations_failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.operations_succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    fn on_rollback(&self, failures: &[CompensationFailure]) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        if !failures.is_empty() {
            self.rollbacks_with_failures.fetch_add(1, Ordering::Relaxed);
            self.compensation_failures
                .fetch_add(failures.len() as u64, Ordering::Relaxed);
        }
    }
}
