//! Concurrent log-observation core for the GPU host agent.
//!
//! Five components, wired leaf-first:
//!
//! - [`process_runner`]: spawns a shell pipeline and streams its combined output line by line.
//! - [`dedup`]: collapses bursts of repeated lines within the same wall-clock second.
//! - [`log_streamer`]: composes a [`process_runner::ProcessRunner`] with a [`dedup::Deduper`]
//!   and a pluggable parser into a stream of [`record::LogRecord`]s.
//! - [`event_processor`]: classifies records against a match function and persists novel
//!   matches into an [`event_bucket::EventBucket`].
//! - [`poller`]: drives an arbitrary "get" function on a cadence, retaining a bounded window
//!   of recent outcomes.
//!
//! [`filter`] holds the shared filter-compilation/matching logic used by both the Log Streamer
//! (via its parser) and the Event Processor (via its match function), and [`registry`] is the
//! process-wide map that lets multiple consumers share one running [`poller::Poller`].

pub mod dedup;
pub mod error;
pub mod event;
pub mod event_bucket;
pub mod event_processor;
pub mod filter;
pub mod log_streamer;
pub mod poller;
pub mod process_runner;
pub mod record;
pub mod registry;

pub use dedup::{Deduper, DeduperConfig};
pub use error::Error;
pub use event::{Event, EventType};
pub use event_bucket::{EventBucket, InMemoryEventBucket};
pub use event_processor::{EventProcessor, MatchFn};
pub use filter::{Filter, FilterSet};
pub use log_streamer::{LineParser, LogStreamer, ParsedLine};
pub use poller::{ErrHandler, GetFn, NoData, Poller, PollerConfig, PollerItem, PollResult};
pub use process_runner::{ProcessRunner, RunnerOutput};
pub use record::LogRecord;
pub use registry::PollerRegistry;
