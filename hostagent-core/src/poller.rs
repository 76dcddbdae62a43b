//! Periodic Poller: runs a caller-provided getter on a fixed interval and retains a bounded
//! history of outcomes. Start/stop is refcounted so unrelated callers can share one poller
//! without racing to tear it down from under each other.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Distinguished sentinel for "the ring has never been populated" — returned instead of `None`
/// so a caller can't confuse "no data yet" with "checked and found nothing" (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoData;

/// Every read path that can observe an empty ring returns this instead of a bare `Option`.
pub type PollResult<X> = Result<X, NoData>;

/// Caller-provided value source. `Ok(None)` is a [`NoData`] tick, not an error.
#[async_trait]
pub trait GetFn<T>: Send + Sync
where
    T: Send + Sync + Clone + 'static,
{
    async fn get(&self) -> anyhow::Result<Option<T>>;
}

#[async_trait]
impl<T, F, Fut> GetFn<T> for F
where
    T: Send + Sync + Clone + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Option<T>>> + Send,
{
    async fn get(&self) -> anyhow::Result<Option<T>> {
        self().await
    }
}

/// Invoked once per failed tick, in addition to the failure being recorded in the ring.
/// Exists so callers can fold poller errors into their own logging/metrics without polling
/// the ring themselves.
pub trait ErrHandler: Send + Sync {
    fn handle(&self, name: &str, err: &anyhow::Error);
}

impl<F> ErrHandler for F
where
    F: Fn(&str, &anyhow::Error) + Send + Sync,
{
    fn handle(&self, name: &str, err: &anyhow::Error) {
        self(name, err)
    }
}

/// One retained outcome: exactly one of `value`/`error` is set, or neither for a [`NoData`]
/// tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerItem<T> {
    pub timestamp: DateTime<Utc>,
    pub value: Option<T>,
    pub error: Option<String>,
}

impl<T> PollerItem<T> {
    fn success(value: T) -> Self {
        Self {
            timestamp: Utc::now(),
            value: Some(value),
            error: None,
        }
    }

    fn no_data() -> Self {
        Self {
            timestamp: Utc::now(),
            value: None,
            error: None,
        }
    }

    fn failure(err: &anyhow::Error) -> Self {
        Self {
            timestamp: Utc::now(),
            value: None,
            error: Some(err.to_string()),
        }
    }

    fn is_success(&self) -> bool {
        self.value.is_some()
    }

    fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub ring_capacity: usize,
    pub get_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            ring_capacity: 64,
            get_timeout: Duration::from_secs(10),
        }
    }
}

struct Shared<T> {
    ring: Mutex<VecDeque<PollerItem<T>>>,
    capacity: usize,
}

impl<T> Shared<T> {
    fn push(&self, item: PollerItem<T>) {
        let mut ring = self.ring.lock();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(item);
    }
}

/// A named, refcounted periodic poller. Cloning a `Poller` shares the same background task
/// and ring; `start`/`stop` manage a shared refcount so the Nth caller to `start` and the Nth
/// caller to `stop` balance out independent of call order between callers.
pub struct Poller<T>
where
    T: Send + Sync + Clone + 'static,
{
    name: String,
    shared: Arc<Shared<T>>,
    get_fn: Arc<dyn GetFn<T>>,
    err_handler: Option<Arc<dyn ErrHandler>>,
    config: PollerConfig,
    refcount: Arc<AtomicUsize>,
    cancel: Arc<Mutex<Option<CancellationToken>>>,
    task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl<T> Clone for Poller<T>
where
    T: Send + Sync + Clone + 'static,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            shared: self.shared.clone(),
            get_fn: self.get_fn.clone(),
            err_handler: self.err_handler.clone(),
            config: self.config.clone(),
            refcount: self.refcount.clone(),
            cancel: self.cancel.clone(),
            task: self.task.clone(),
        }
    }
}

impl<T> Poller<T>
where
    T: Send + Sync + Clone + 'static,
{
    pub fn new(
        name: impl Into<String>,
        config: PollerConfig,
        get_fn: Arc<dyn GetFn<T>>,
        err_handler: Option<Arc<dyn ErrHandler>>,
    ) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                ring: Mutex::new(VecDeque::with_capacity(config.ring_capacity)),
                capacity: config.ring_capacity,
            }),
            get_fn,
            err_handler,
            config,
            refcount: Arc::new(AtomicUsize::new(0)),
            cancel: Arc::new(Mutex::new(None)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Increments the caller count; spawns the background task only for the first caller.
    pub fn start(&self) {
        let previous = self.refcount.fetch_add(1, Ordering::SeqCst);
        if previous != 0 {
            return;
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        let name = self.name.clone();
        let shared = self.shared.clone();
        let get_fn = self.get_fn.clone();
        let err_handler = self.err_handler.clone();
        let interval_period = self.config.interval;
        let get_timeout = self.config.get_timeout;

        let task = tokio::spawn(async move {
            // `tokio::time::interval` fires its first tick immediately, which gives the
            // poller a value on registration instead of waiting a full period.
            let mut ticker = tokio::time::interval(interval_period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let outcome = tokio::time::timeout(get_timeout, get_fn.get()).await;
                let item = match outcome {
                    Ok(Ok(Some(value))) => PollerItem::success(value),
                    Ok(Ok(None)) => PollerItem::no_data(),
                    Ok(Err(err)) => {
                        if let Some(handler) = &err_handler {
                            handler.handle(&name, &err);
                        }
                        log::warn!("poller {name}: get failed: {err}");
                        PollerItem::failure(&err)
                    }
                    Err(_) => {
                        let err = anyhow::anyhow!("get timed out after {get_timeout:?}");
                        if let Some(handler) = &err_handler {
                            handler.handle(&name, &err);
                        }
                        log::warn!("poller {name}: get timed out");
                        PollerItem::failure(&err)
                    }
                };
                shared.push(item);
            }
        });

        *self.task.lock() = Some(task);
    }

    /// Decrements the caller count; tears the background task down only for the last caller.
    ///
    /// # Panics
    ///
    /// Panics if called without a matching outstanding `start` — stopping a poller nobody is
    /// holding is a caller bug, not a runtime condition to recover from.
    pub async fn stop(&self) {
        let previous = self.refcount.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
            count.checked_sub(1)
        });
        let Ok(previous) = previous else {
            panic!("poller {}: stop called with no outstanding start", self.name);
        };
        if previous != 1 {
            return;
        }

        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.lock().take() {
            let _ = task.await;
        }
    }

    /// Most recent item, or [`NoData`] if the ring has never been populated.
    pub fn last(&self) -> PollResult<PollerItem<T>> {
        self.shared.ring.lock().back().cloned().ok_or(NoData)
    }

    /// Most recent item whose `error` is `None`, or [`NoData`] if the ring is empty. A ring
    /// whose tail items all carry errors but whose earlier items don't still yields the most
    /// recent error-free item — this scans the whole ring, not just the tail.
    pub fn last_success(&self) -> PollResult<PollerItem<T>> {
        let ring = self.shared.ring.lock();
        if ring.is_empty() {
            return Err(NoData);
        }
        ring.iter().rev().find(|item| item.is_success()).cloned().ok_or(NoData)
    }

    /// The most recent non-nil error: `Ok(Some(message))` if one exists, `Ok(None)` if the ring
    /// has items but none carry an error, [`NoData`] only when the ring is empty outright.
    pub fn last_error(&self) -> PollResult<Option<String>> {
        let ring = self.shared.ring.lock();
        if ring.is_empty() {
            return Err(NoData);
        }
        Ok(ring
            .iter()
            .rev()
            .find_map(|item| item.error.clone()))
    }

    /// Items with timestamp ≥ `since`, in insertion order. [`NoData`] only when the ring is
    /// empty outright; a `since` that excludes every item yields `Ok(vec![])`, not `NoData`.
    pub fn all(&self, since: DateTime<Utc>) -> PollResult<Vec<PollerItem<T>>> {
        let ring = self.shared.ring.lock();
        if ring.is_empty() {
            return Err(NoData);
        }
        Ok(ring
            .iter()
            .filter(|item| item.timestamp >= since)
            .cloned()
            .collect())
    }
}
