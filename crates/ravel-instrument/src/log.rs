//! Leveled diagnostics sink
//!
//! The method database filters messages by level before they reach the
//! sink: warnings always pass, info needs `verbose` or `debug`, debug needs
//! `debug`.

use parking_lot::Mutex;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Diagnostic level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    /// Per-instruction detail
    Debug,
    /// Progress messages
    Info,
    /// Recoverable problems
    Warning,
}

impl LogLevel {
    pub(crate) fn bit(self) -> u8 {
        match self {
            LogLevel::Debug => 1 << 0,
            LogLevel::Info => 1 << 1,
            LogLevel::Warning => 1 << 2,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
        })
    }
}

/// Receiver of instrumentation diagnostics
pub trait Log: Send + Sync {
    /// Record a message
    fn log(&self, level: LogLevel, msg: &str);

    /// Record a failure together with its cause
    fn error(&self, msg: &str, cause: &dyn Error);
}

impl<L: Log + ?Sized> Log for Arc<L> {
    fn log(&self, level: LogLevel, msg: &str) {
        (**self).log(level, msg)
    }

    fn error(&self, msg: &str, cause: &dyn Error) {
        (**self).error(msg, cause)
    }
}

/// Sink forwarding to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl Log for TracingLog {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "ravel::instrument", "{}", msg),
            LogLevel::Info => tracing::info!(target: "ravel::instrument", "{}", msg),
            LogLevel::Warning => tracing::warn!(target: "ravel::instrument", "{}", msg),
        }
    }

    fn error(&self, msg: &str, cause: &dyn Error) {
        tracing::error!(target: "ravel::instrument", error = %cause, "{}", msg);
    }
}

/// Sink that keeps every message in memory
#[derive(Debug, Default)]
pub struct CapturingLog {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl CapturingLog {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages recorded so far
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries.lock().clone()
    }

    /// Messages recorded at `level`
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Log for CapturingLog {
    fn log(&self, level: LogLevel, msg: &str) {
        self.entries.lock().push((level, msg.to_string()));
    }

    fn error(&self, msg: &str, cause: &dyn Error) {
        self.entries
            .lock()
            .push((LogLevel::Warning, format!("{}: {}", msg, cause)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capturing_log() {
        let log = Arc::new(CapturingLog::new());
        let sink: Box<dyn Log> = Box::new(Arc::clone(&log));
        sink.log(LogLevel::Info, "first");
        sink.log(LogLevel::Warning, "second");
        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.messages(LogLevel::Warning), vec!["second".to_string()]);
    }
}
