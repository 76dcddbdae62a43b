//! Event Processor: consumes a [`LogStreamer`]'s records, classifies the ones that match, and
//! writes newly-seen classifications into an [`EventBucket`].

use std::sync::Arc;

use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::event::Event;
use crate::event_bucket::EventBucket;
use crate::log_streamer::LogStreamer;
use crate::record::LogRecord;

/// Upper bound on a single Find-then-Insert round trip against the bucket. A bucket that is
/// unreachable should not wedge the processor forever.
pub const BUCKET_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Caller-provided classifier: returns `Some(event)` when a record should be recorded, `None`
/// to pass it by.
pub trait MatchFn: Send + Sync {
    fn classify(&self, record: &LogRecord) -> Option<Event>;
}

impl<F> MatchFn for F
where
    F: Fn(&LogRecord) -> Option<Event> + Send + Sync,
{
    fn classify(&self, record: &LogRecord) -> Option<Event> {
        self(record)
    }
}

/// Drives one [`LogStreamer`] against one classifier and [`EventBucket`].
pub struct EventProcessor {
    cancel: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
    bucket: Arc<dyn EventBucket>,
}

impl EventProcessor {
    pub fn spawn(
        mut streamer: LogStreamer,
        classify: Arc<dyn MatchFn>,
        bucket: Arc<dyn EventBucket>,
        cancel: CancellationToken,
    ) -> Self {
        let task_bucket = bucket.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                let record = tokio::select! {
                    _ = task_cancel.cancelled() => None,
                    record = streamer.lines().recv() => record,
                };
                let Some(record) = record else { break };

                let Some(event) = classify.classify(&record) else {
                    continue;
                };

                let already_seen = match tokio::time::timeout(
                    BUCKET_CALL_TIMEOUT,
                    task_bucket.find(&event),
                )
                .await
                {
                    Ok(found) => found.is_some(),
                    Err(_) => {
                        log::warn!("event processor: Find timed out, dropping {}", event.name);
                        continue;
                    }
                };
                if already_seen {
                    continue;
                }

                match tokio::time::timeout(BUCKET_CALL_TIMEOUT, task_bucket.insert(event.clone()))
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        log::warn!("event processor: insert failed for {}: {err}", event.name)
                    }
                    Err(_) => log::warn!("event processor: Insert timed out for {}", event.name),
                }
            }
            streamer.close().await;
        });

        Self {
            cancel,
            task: Some(task),
            bucket,
        }
    }

    /// Delegates straight to the bucket; kept here so callers have a single handle for both
    /// the processor and its storage.
    pub async fn events(&self, since: chrono::DateTime<chrono::Utc>) -> Vec<Event> {
        self.bucket.get(since).await
    }

    /// Idempotent. Stops the processing loop and, through it, the underlying streamer.
    pub async fn close(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}
