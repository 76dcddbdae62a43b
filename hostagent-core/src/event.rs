//! [`Event`] and [`EventType`]: the classified, persisted output of the Event Processor.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Info,
    Warning,
    Critical,
    Fatal,
    Unknown,
}

/// A classified incident. `(timestamp-second, name, message, type)` is the deduplication key
/// used by the Event Bucket's `Find`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub name: String,
    pub message: String,
    pub extras: HashMap<String, String>,
}

impl Event {
    pub fn new(
        timestamp: DateTime<Utc>,
        event_type: EventType,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            event_type,
            name: name.into(),
            message: message.into(),
            extras: HashMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// The `(timestamp-second, name, message, type)` tuple used as the dedup/lookup key.
    pub fn dedup_key(&self) -> (i64, String, String, EventType) {
        (
            self.timestamp.timestamp(),
            self.name.clone(),
            self.message.clone(),
            self.event_type,
        )
    }
}
