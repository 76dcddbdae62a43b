//! Event Bucket: the external persistence collaborator the core depends on but does not
//! own. The trait is the contract; [`InMemoryEventBucket`] is a reference implementation used
//! by this crate's own tests and by callers who do not need durable storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::error::Error;
use crate::event::Event;

/// `(timestamp-second, name, message, type)` — mirrors [`Event::dedup_key`].
pub type EventKey = (i64, String, String, crate::event::EventType);

#[async_trait]
pub trait EventBucket: Send + Sync {
    /// Lookup by `(timestamp-second, name, message, type)`.
    async fn find(&self, candidate: &Event) -> Option<Event>;

    /// Not required to be idempotent — callers always `Find` first.
    async fn insert(&self, event: Event) -> Result<(), Error>;

    /// Events with timestamp ≥ `since`, descending-timestamp order.
    async fn get(&self, since: DateTime<Utc>) -> Vec<Event>;

    /// Deletes events older than `before`, returning the count removed. Driven by a retention
    /// sweeper outside the core.
    async fn purge(&self, before: DateTime<Utc>) -> usize;
}

/// `RwLock`-backed reference implementation: reads (Find/Get) may proceed concurrently,
/// while writes (Insert/Purge) are serialized against both other writes and readers.
#[derive(Default)]
pub struct InMemoryEventBucket {
    // Keyed by insertion-ordered key so Get can iterate the map in descending-timestamp order
    // without a secondary sort; BTreeMap's key ordering does the work for us.
    events: RwLock<BTreeMap<(i64, String), Event>>,
}

impl InMemoryEventBucket {
    pub fn new() -> Self {
        Self::default()
    }

    fn map_key(event: &Event) -> (i64, String) {
        // Sortable primary key: timestamp first so BTreeMap iteration order matches Get's
        // contract; name appended to disambiguate same-second events deterministically.
        (event.timestamp.timestamp(), event.name.clone())
    }
}

#[async_trait]
impl EventBucket for InMemoryEventBucket {
    async fn find(&self, candidate: &Event) -> Option<Event> {
        let key = candidate.dedup_key();
        let events = self.events.read();
        events
            .values()
            .find(|e| e.dedup_key() == key)
            .cloned()
    }

    async fn insert(&self, event: Event) -> Result<(), Error> {
        let mut events = self.events.write();
        events.insert(Self::map_key(&event), event);
        Ok(())
    }

    async fn get(&self, since: DateTime<Utc>) -> Vec<Event> {
        let events = self.events.read();
        let mut out: Vec<Event> = events
            .values()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out
    }

    async fn purge(&self, before: DateTime<Utc>) -> usize {
        let mut events = self.events.write();
        let before_len = events.len();
        events.retain(|_, e| e.timestamp >= before);
        before_len - events.len()
    }
}
