//! eventsynth data model
//!
//! - [`Event`]: one user action (id, user, kind, timestamp, properties, site)
//! - [`EventPayload`]: property payload tagged by [`EventKind`]
//! - [`corpus`]: NDJSON / JSON-array corpus files
//! - [`CorpusStats`]: per-kind and per-anomaly counts
//!
//! The JSON wire record is flat:
//!
//! ```text
//! {"event_id": "...", "user_id": "user_17", "event_name": "page_view",
//!  "timestamp": "2024-05-01T03:15:00Z", "properties": {...}, "site_url": "..."}
//! ```

pub mod corpus;
pub mod event;
pub mod kind;
pub mod properties;
pub mod stats;
pub mod time;

pub use corpus::CorpusFormat;
pub use event::{Event, EventId, EventRecord, DEFAULT_SITE_URL};
pub use kind::EventKind;
pub use properties::{AnomalyMarker, ClientContext, EventPayload, ExtraProperties};
pub use stats::CorpusStats;

/// Invalid event content.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("unknown event kind `{0}`")]
    UnknownKind(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid timestamp `{0}` (expected RFC 3339 or `YYYY-MM-DD[T ]hh:mm:ss[.fff]`)")]
    InvalidTimestamp(String),
    #[error("invalid properties for {kind}: {source}")]
    InvalidProperties {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure reading or writing a corpus file.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown corpus format `{0}` (expected ndjson|json)")]
    UnknownFormat(String),
}
