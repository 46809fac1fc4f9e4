//! Capturing run log
//!
//! Every entry is forwarded to `tracing` as it is recorded and also kept in an
//! in-memory buffer. At the end of a run the buffer is drained and rendered
//! into the sentinel file, so the file carries the full story of the run even
//! when the process log went elsewhere.

use chrono::{DateTime, Local};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single captured log line
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// Render as `[YYYY-MM-DD HH:MM:SS] [level] message`
    pub fn format(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Render entries newline-joined, in the order given
pub fn format_batch(entries: &[LogEntry]) -> String {
    entries
        .iter()
        .map(LogEntry::format)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Append-only log buffer shared by the orchestrator and the dispatcher
#[derive(Debug, Default)]
pub struct WarmupLog {
    buffer: Mutex<Vec<LogEntry>>,
}

impl WarmupLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward to tracing and append to the buffer
    pub fn record(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();

        match level {
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }

        self.lock().push(LogEntry {
            timestamp: Local::now(),
            level,
            message,
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.record(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.record(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogLevel::Error, message);
    }

    /// Return every buffered entry in insertion order and empty the buffer
    pub fn drain(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        // A panic while holding the lock cannot leave a Vec half-pushed.
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
