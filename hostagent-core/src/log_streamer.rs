//! Log Streamer: composes a [`ProcessRunner`], a [`Deduper`], and a pluggable parser
//! into a single stream of deduplicated [`LogRecord`]s.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dedup::{Deduper, DeduperConfig};
use crate::error::Error;
use crate::process_runner::{ProcessRunner, RunnerOutput};
use crate::record::LogRecord;

/// Channel capacity for the streamer's parsed-record output: large enough to absorb an
/// initial `dmesg` burst without loss.
pub const RECORD_CHANNEL_CAPACITY: usize = 3000;

/// The result of parsing one raw line: a timestamp and trimmed content, with optional
/// facility/level when the source format encodes them.
#[derive(Debug, Clone)]
pub struct ParsedLine {
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub facility: Option<String>,
    pub level: Option<String>,
}

/// Callee-provided line parser: a closure or small trait implementation. Must never
/// fail fatally — a line whose timestamp can't be extracted still yields a `ParsedLine` using
/// the current wall-clock time and the raw line as content.
pub trait LineParser: Send + Sync {
    fn parse(&self, line: &str) -> ParsedLine;
}

impl<F> LineParser for F
where
    F: Fn(&str) -> ParsedLine + Send + Sync,
{
    fn parse(&self, line: &str) -> ParsedLine {
        self(line)
    }
}

/// Composes a process pipeline, a parser, and a deduper into a record stream.
pub struct LogStreamer {
    records_rx: mpsc::Receiver<LogRecord>,
    cancel: CancellationToken,
    pump_task: Option<tokio::task::JoinHandle<()>>,
    runner_handle: Arc<tokio::sync::Mutex<ProcessRunner>>,
    deduper: Arc<tokio::sync::Mutex<Deduper>>,
}

impl LogStreamer {
    pub async fn open(
        commands: Vec<Vec<String>>,
        parse_line: Arc<dyn LineParser>,
        dedupe_params: DeduperConfig,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let runner_cancel = cancel.child_token();
        let runner = ProcessRunner::start(commands, runner_cancel, false).await?;
        let runner_handle = Arc::new(tokio::sync::Mutex::new(runner));
        let deduper = Arc::new(tokio::sync::Mutex::new(Deduper::new(dedupe_params)));

        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);

        let pump_runner = runner_handle.clone();
        let pump_deduper = deduper.clone();
        let pump_cancel = cancel.clone();
        let pump_task = tokio::spawn(async move {
            loop {
                let item = {
                    let mut runner = pump_runner.lock().await;
                    tokio::select! {
                        _ = pump_cancel.cancelled() => None,
                        item = runner.lines().recv() => item,
                    }
                };
                let Some(item) = item else { break };

                // A read-error signal is terminal and synthetic — it never came from the
                // child's output — so it bypasses both the line parser and the Deduper and
                // goes straight out as an error record.
                let record = match item {
                    RunnerOutput::Line(line) => {
                        let parsed = parse_line.parse(&line);
                        let record = LogRecord::new(
                            parsed.timestamp,
                            parsed.facility.unwrap_or_default(),
                            parsed.level.unwrap_or_default(),
                            parsed.content,
                        );

                        let occurrence = {
                            let deduper = pump_deduper.lock().await;
                            deduper.observe(&record)
                        };
                        if occurrence > 1 {
                            log::debug!(
                                "log streamer: dropping repeat (occurrence {occurrence})"
                            );
                            continue;
                        }
                        record
                    }
                    RunnerOutput::ReadError(message) => {
                        log::error!("log streamer: process runner read error: {message}");
                        LogRecord::terminal_error(message)
                    }
                };

                // Non-blocking send with drop-on-full: a duplicate-heavy burst should not
                // stall the kernel-log reader.
                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(record) {
                    log::warn!("log streamer: record channel full, dropping record");
                } else if tx.is_closed() {
                    break;
                }
            }
        });

        Ok(Self {
            records_rx: rx,
            cancel,
            pump_task: Some(pump_task),
            runner_handle,
            deduper,
        })
    }

    pub fn lines(&mut self) -> &mut mpsc::Receiver<LogRecord> {
        &mut self.records_rx
    }

    /// Idempotent. Stops the pump, closes the Process Runner, and stops the Deduper's purge
    /// worker.
    pub async fn close(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if let Some(task) = self.pump_task.take() {
            let _ = task.await;
        }
        self.runner_handle.lock().await.close().await;
        self.deduper.lock().await.close().await;
    }
}

/// ISO dmesg parser: expects a prefix matching
/// `YYYY-MM-DDTHH:MM:SS,microseconds±HH:MM`, possibly preceded by `facility : level :` tokens.
/// Lives in `hostagent-log-parsers`; re-exported here only as a doc pointer since the Log
/// Streamer's contract is parser-agnostic.
pub fn identity_parser() -> Arc<dyn LineParser> {
    Arc::new(|line: &str| ParsedLine {
        timestamp: Utc::now(),
        content: line.trim().to_string(),
        facility: None,
        level: None,
    })
}
