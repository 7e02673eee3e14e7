//! Log and progress sinks.
//!
//! The workflow reports user-visible lines and fractional progress through
//! callbacks supplied by the caller (the CLI installs a terminal printer and
//! an indicatif bar; tests install collectors). Internal diagnostics go
//! through `tracing` as usual.

use std::sync::Arc;

/// Severity of a workflow log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Callback receiving each workflow log line.
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Callback receiving fractional completion. `None` hides the indicator.
pub type ProgressCallback = Arc<dyn Fn(Option<f64>) + Send + Sync>;

/// Bundle of caller-supplied sinks, cheap to clone across workers.
#[derive(Clone)]
pub struct EventSinks {
    log: LogCallback,
    progress: ProgressCallback,
}

impl EventSinks {
    pub fn new(log: LogCallback, progress: ProgressCallback) -> Self {
        Self { log, progress }
    }

    /// Sinks that discard everything.
    pub fn disabled() -> Self {
        Self {
            log: Arc::new(|_, _| {}),
            progress: Arc::new(|_| {}),
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        (self.log)(level, message);
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message.as_ref());
    }

    /// Report fractional completion in `0.0..=1.0`, or `None` to hide.
    pub fn progress(&self, fraction: Option<f64>) {
        (self.progress)(fraction);
    }
}

impl std::fmt::Debug for EventSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSinks").finish_non_exhaustive()
    }
}
