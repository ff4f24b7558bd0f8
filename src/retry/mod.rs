//! Retry with exponential backoff, applied to compensations during rollback.
//!
//! Operations themselves are never retried: the caller decides what to do
//! with a failed `do_op`. Compensations run without a caller in the loop, so
//! each one may carry a [`RetryPolicy`].

mod error;
mod policy;

use std::sync::Arc;

use tracing::Level;

use crate::context::Context;
use crate::observer::logger::{emit, Logger};
use crate::recover::guard;
use crate::BoxError;

pub use error::RetryError;
pub use policy::RetryPolicy;

/// Run `compensate` once and, if it fails and a policy is given, retry it.
///
/// Without a policy the single attempt's error is returned as-is. With one,
/// the final error is a [`RetryError`] carrying the attempt count. A context
/// that ends during a backoff wait stops retrying immediately.
pub fn compensate_with_retry<F>(
    ctx: &Context,
    compensate: F,
    policy: Option<&RetryPolicy>,
    logger: Option<&Arc<dyn Logger>>,
) -> Result<(), BoxError>
where
    F: Fn(&Context) -> Result<(), BoxError>,
{
    let mut last = match guard(|| compensate(ctx)) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    let Some(policy) = policy else {
        return Err(last);
    };

    let mut attempts: u32 = 1;
    let mut delay = policy.first_delay();

    for _ in 0..policy.max_retries {
        emit(
            logger,
            Level::DEBUG,
            format_args!(
                "compensation attempt {} failed ({}), retrying in {:?}",
                attempts, last, delay
            ),
        );

        if let Err(cause) = ctx.sleep(delay) {
            return Err(Box::new(RetryError::Interrupted {
                attempts,
                cause,
                source: last,
            }));
        }

        attempts += 1;
        match guard(|| compensate(ctx)) {
            Ok(()) => return Ok(()),
            Err(err) => last = err,
        }
        delay = policy.next_delay(delay);
    }

    Err(Box::new(RetryError::Exhausted {
        attempts,
        source: last,
    }))
}
