//! Opt-in diagnostic output.
//!
//! A transaction stays silent until a [`Logger`] is installed with
//! `Transaction::set_logger`. [`TracingLogger`] forwards into `tracing`.

use std::fmt;
use std::sync::Arc;

use tracing::Level;

use crate::recover::recover;

/// Sink for the engine's internal diagnostics.
///
/// Messages are informational only; nothing the engine decides depends on
/// whether they were delivered.
pub trait Logger: Send + Sync {
    /// Record one diagnostic message.
    fn log(&self, level: Level, message: &str);
}

impl<F> Logger for F
where
    F: Fn(Level, &str) + Send + Sync,
{
    fn log(&self, level: Level, message: &str) {
        self(level, message)
    }
}

/// Forwards diagnostics to `tracing` under the `atom` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        if level == Level::ERROR {
            tracing::error!(target: "atom", "{}", message);
        } else if level == Level::WARN {
            tracing::warn!(target: "atom", "{}", message);
        } else if level == Level::INFO {
            tracing::info!(target: "atom", "{}", message);
        } else if level == Level::DEBUG {
            tracing::debug!(target: "atom", "{}", message);
        } else {
            tracing::trace!(target: "atom", "{}", message);
        }
    }
}

/// Format and emit only when a logger is installed. A panicking logger is
/// ignored.
pub(crate) fn emit(logger: Option<&Arc<dyn Logger>>, level: Level, message: fmt::Arguments<'_>) {
    if let Some(logger) = logger {
        let message = message.to_string();
        let _ = recover(|| logger.log(level, &message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_closure_logger() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let logger: Arc<dyn Logger> = Arc::new(move |level: Level, msg: &str| {
            sink.lock().push((level, msg.to_string()));
        });

        emit(Some(&logger), Level::WARN, format_args!("hook {} failed", 2));
        emit(None, Level::WARN, format_args!("dropped"));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (Level::WARN, "hook 2 failed".to_string()));
    }

    #[test]
    fn test_tracing_logger_without_subscriber() {
        // No subscriber installed: must be a silent no-op.
        TracingLogger.log(Level::DEBUG, "nothing listens");
    }
}
