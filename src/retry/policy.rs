//! Exponential-backoff policy for compensations.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a failing compensation is retried during rollback.
///
/// The first attempt always happens; `max_retries` more follow, each after a
/// delay that starts at `initial_delay` and grows by `backoff_multiplier`,
/// never beyond `max_delay` when one is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Factor applied to the delay after every retry.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    /// Default delays with a custom retry count.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set the delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Cap every delay at `delay`.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Total attempts this policy allows, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub(crate) fn first_delay(&self) -> Duration {
        self.cap(self.initial_delay)
    }

    /// Delay that follows `current`.
    ///
    /// A multiplier that does not yield a representable duration (negative,
    /// NaN) keeps the current delay; overflow saturates to `max_delay`.
    pub(crate) fn next_delay(&self, current: Duration) -> Duration {
        let scaled = current.as_secs_f64() * self.backoff_multiplier;
        let next = if scaled.is_nan() || scaled < 0.0 {
            current
        } else {
            Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX)
        };
        self.cap(next)
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_delay {
            Some(max) if delay > max => max,
            _ => delay,
        }
    }
}
