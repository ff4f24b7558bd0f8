//! Transaction configuration and per-call options.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Transaction configuration options.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Label included in diagnostics.
    pub name: Option<String>,
    /// How often commit/rollback re-check for in-flight operations.
    pub poll_interval: Duration,
    /// Retry policy attached to operations that don't bring their own.
    pub default_compensation_retry: Option<RetryPolicy>,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            name: None,
            poll_interval: Duration::from_millis(1),
            default_compensation_retry: None,
        }
    }
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the diagnostic label.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the quiescence poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the fallback compensation retry policy.
    pub fn default_compensation_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_compensation_retry = Some(policy);
        self
    }
}

/// Options for a single `do_with_options` call.
#[derive(Debug, Clone, Default)]
pub struct DoOptions {
    /// Bounds the operation only; the compensation is bounded separately
    /// by whatever context rollback runs under. Zero means no extra bound.
    pub timeout: Option<Duration>,
    /// Retry policy for this operation's compensation.
    pub compensation_retry: Option<RetryPolicy>,
}

impl DoOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn compensation_retry(mut self, policy: RetryPolicy) -> Self {
        self.compensation_retry = Some(policy);
        self
    }

    /// The timeout, if it actually bounds anything.
    pub(crate) fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|t| !t.is_zero())
    }
}
