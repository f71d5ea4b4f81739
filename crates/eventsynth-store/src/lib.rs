//! Event store access
//!
//! ```text
//! Corpus ──► BatchWriter ──► EventStore::insert ──► events table
//!                                 ▲
//! QueryFacade / SqlTool ──────────┘ query (bound parameters, JSONCompact)
//! ```
//!
//! [`EventStore`] is the seam: [`ClickHouseStore`] talks to the ClickHouse
//! HTTP interface, [`MemoryStore`] keeps rows in process and records every
//! call so writers and facades can be tested without a server.

pub mod clickhouse;
pub mod config;
pub mod facade;
pub mod memory;
pub mod params;
pub mod result;
pub mod row;
pub mod store;
pub mod writer;

pub use clickhouse::ClickHouseStore;
pub use config::{StoreConfig, StoreOverrides};
pub use facade::{render_capped, render_table, EventFilter, QueryFacade, SqlTool, AGENT_ROW_CAP};
pub use memory::MemoryStore;
pub use params::{ParamValue, QueryParams};
pub use result::{Cell, Column, QueryResult};
pub use row::EventRow;
pub use store::{EventStore, QueryOptions};
pub use writer::{BatchWriter, Checkpoint, RetryPolicy, WriteError, WriteReport, WriterConfig};

use std::time::Duration;

/// Invalid or missing connection settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting `{field}` (pass --{flag} or set {env})")]
    Missing {
        field: &'static str,
        flag: &'static str,
        env: &'static str,
    },
    #[error("invalid value for `{field}`: `{value}` ({reason})")]
    Invalid {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Failure talking to the store.
///
/// Messages are kept as strings so errors can be cloned into scripted
/// failures and across retry attempts.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("failed to reach store at {url}: {message}")]
    Unreachable { url: String, message: String },
    #[error("store request timed out after {0:?}")]
    Timeout(Duration),
    #[error("store transport error: {0}")]
    Transport(String),
    #[error("store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("failed to decode store response: {0}")]
    Decode(String),
    #[error("invalid identifier `{0}` (expected [A-Za-z_][A-Za-z0-9_]*)")]
    InvalidIdentifier(String),
}

impl StoreError {
    /// Worth retrying: network failures, timeouts, HTTP 5xx and 429.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unreachable { .. } | StoreError::Timeout(_) | StoreError::Transport(_) => true,
            StoreError::Http { status, .. } => *status >= 500 || *status == 429,
            StoreError::Decode(_) | StoreError::InvalidIdentifier(_) => false,
        }
    }

    /// The store could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unreachable { .. } | StoreError::Timeout(_))
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`; database and table names are interpolated into SQL.
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
