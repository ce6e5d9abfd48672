//! Injected logging capability.
//!
//! The pool and every connection report through a caller-chosen sink rather
//! than depending on a logging framework directly. Internally the crate also
//! emits `tracing` events; [`TracingSink`] bridges the injected interface
//! onto `tracing` for callers who want a single pipeline.

use std::sync::Arc;

/// Severity levels, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Caller-supplied sink: one method to query the active level, one to emit a
/// line.
pub trait LogSink: Send + Sync {
    /// The most verbose level currently enabled.
    fn current_level(&self) -> LogLevel;
    fn print(&self, level: LogLevel, line: &str);
}

/// Threshold plus optional sink, carried by the pool and copied onto every
/// connection it creates.
#[derive(Clone, Default)]
pub struct LogContext {
    threshold: Option<LogLevel>,
    sink: Option<Arc<dyn LogSink>>,
}

impl std::fmt::Debug for LogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogContext")
            .field("threshold", &self.threshold)
            .field("sink", &self.sink.as_ref().map(|_| "<dyn LogSink>"))
            .finish()
    }
}

impl LogContext {
    #[must_use]
    pub fn new(threshold: LogLevel, sink: Arc<dyn LogSink>) -> Self {
        Self {
            threshold: Some(threshold),
            sink: Some(sink),
        }
    }

    /// Install or replace the sink and its activation threshold.
    pub fn register(&mut self, threshold: LogLevel, sink: Arc<dyn LogSink>) {
        self.threshold = Some(threshold);
        self.sink = Some(sink);
    }

    /// A line at `level` would actually be printed: a sink is registered and
    /// its current level is at or above the activation threshold.
    #[must_use]
    pub fn will_log(&self, level: LogLevel) -> bool {
        match (&self.sink, self.threshold) {
            (Some(sink), Some(threshold)) => level <= threshold && sink.current_level() >= level,
            _ => false,
        }
    }

    pub fn log_print(&self, level: LogLevel, line: &str) {
        if self.will_log(level) {
            if let Some(sink) = &self.sink {
                sink.print(level, line);
            }
        }
    }
}

/// Forwards the injected interface onto `tracing` events.
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    level: LogLevel,
}

impl TracingSink {
    #[must_use]
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl LogSink for TracingSink {
    fn current_level(&self) -> LogLevel {
        self.level
    }

    fn print(&self, level: LogLevel, line: &str) {
        match level {
            LogLevel::Error => tracing::error!("{line}"),
            LogLevel::Warn => tracing::warn!("{line}"),
            LogLevel::Info => tracing::info!("{line}"),
            LogLevel::Debug => tracing::debug!("{line}"),
            LogLevel::Trace => tracing::trace!("{line}"),
        }
    }
}
