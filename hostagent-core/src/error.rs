//! Construction-time error taxonomy.
//!
//! Transient, per-call failures are never modeled here — they are carried as data
//! ([`crate::record::LogRecord::error`], [`crate::poller::PollerItem::error`]) so that a
//! caller who only wants the happy path never has to match on a `Result`.

use thiserror::Error;

/// Fatal, construction-time failures. These are the only errors that cross the public API;
/// everything that happens after a component has started is logged and survived.
#[derive(Debug, Error)]
pub enum Error {
    #[error("commands list must not be empty")]
    InvalidArgument,

    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("invalid filter regex for {name}: {source}")]
    InvalidFilterRegex {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("filter {name} must set a regex, a substring, or both")]
    EmptyFilter { name: String },

    #[error("duplicate filter name: {0}")]
    DuplicateFilterName(String),

    #[error("storage error: {0}")]
    Storage(String),
}
