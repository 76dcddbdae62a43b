//! Poller Registry: the single source of truth mapping a stable identity (e.g. a log file
//! path) to the [`Poller`] instance watching it, so unrelated callers asking about the same
//! identity share one background task instead of each starting their own.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::poller::Poller;

/// Keyed, type-erased home for [`Poller`] instances. Callers fetch by identity and a concrete
/// value type; a mismatched type for an existing identity is a caller bug and returns `None`
/// rather than panicking, since the registry can't know which caller is wrong.
#[derive(Default)]
pub struct PollerRegistry {
    pollers: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the poller registered under `identity`, inserting `make()`'s result if absent.
    /// The registry never calls `start`/`stop` itself — that remains the caller's
    /// responsibility so refcounting reflects real callers, not registry lookups.
    pub fn get_or_insert_with<T, F>(&self, identity: &str, make: F) -> Option<Poller<T>>
    where
        T: Send + Sync + Clone + 'static,
        F: FnOnce() -> Poller<T>,
    {
        let mut pollers = self.pollers.lock();
        if let Some(existing) = pollers.get(identity) {
            return existing.downcast_ref::<Poller<T>>().cloned();
        }
        let poller = make();
        pollers.insert(identity.to_string(), Box::new(poller.clone()));
        Some(poller)
    }

    pub fn get<T>(&self, identity: &str) -> Option<Poller<T>>
    where
        T: Send + Sync + Clone + 'static,
    {
        self.pollers
            .lock()
            .get(identity)
            .and_then(|boxed| boxed.downcast_ref::<Poller<T>>())
            .cloned()
    }

    pub fn remove(&self, identity: &str) {
        self.pollers.lock().remove(identity);
    }

    pub fn len(&self) -> usize {
        self.pollers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide handle, shared the way the core's other singletons are: an [`Arc`] the
/// binary constructs once at startup and clones into whichever components need lookups.
pub fn shared_registry() -> Arc<PollerRegistry> {
    Arc::new(PollerRegistry::new())
}
