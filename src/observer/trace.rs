//! Observer that reports through `tracing`.

use std::error::Error;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::observer::Observer;
use crate::transaction::CompensationFailure;

/// Whole microseconds, saturating at `u64::MAX`.
fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Emits one `tracing` event per notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_operation_start(&self, name: &str) {
        debug!(operation = name, "Operation started");
    }

    fn on_operation_end(&self, name: &str, duration: Duration, err: Option<&(dyn Error + 'static)>) {
        let elapsed_us = micros(duration);
        match err {
            None => debug!(operation = name, elapsed_us, "Operation finished"),
            Some(e) => warn!(
                operation = name,
                elapsed_us,
                error = %e,
                "Operation failed"
            ),
        }
    }

    fn on_commit(&self) {
        info!("Transaction committed");
    }

    fn on_rollback(&self, failures: &[CompensationFailure]) {
        if failures.is_empty() {
            info!("Transaction rolled back");
        } else {
            for failure in failures {
                warn!(
                    operation = %failure.operation,
                    index = failure.index,
                    error = %failure.source,
                    "Compensation failed"
                );
            }
            warn!(failures = failures.len(), "Transaction rolled back with failures");
        }
    }
}
