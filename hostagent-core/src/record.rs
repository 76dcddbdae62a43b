//! [`LogRecord`]: the unit the Process Runner's raw lines are turned into.

use chrono::{DateTime, Utc};

/// A single parsed, not-yet-classified log line.
///
/// If `error` is set this record carries a terminal error from the Process Runner's read
/// loop; every other field may then be zero-valued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub facility: String,
    pub level: String,
    pub content: String,
    pub error: Option<String>,
}

impl LogRecord {
    /// Construct a record from a parsed line (see [`crate::log_streamer::ParsedLine`]).
    pub fn new(
        timestamp: DateTime<Utc>,
        facility: String,
        level: String,
        content: String,
    ) -> Self {
        Self {
            timestamp,
            facility,
            level,
            content,
            error: None,
        }
    }

    /// Construct the terminal synthetic record emitted once on a Process Runner read error.
    pub fn terminal_error(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            facility: String::new(),
            level: String::new(),
            content: String::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
