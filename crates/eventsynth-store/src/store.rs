use crate::params::QueryParams;
use crate::result::QueryResult;
use crate::row::EventRow;
use crate::StoreError;

/// Per-query options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Ask the server to reject anything but reads.
    pub readonly: bool,
}

impl QueryOptions {
    pub fn readonly() -> Self {
        Self { readonly: true }
    }
}

/// A columnar events table.
///
/// Implementations are blocking; async callers go through `spawn_blocking`.
pub trait EventStore: Send + Sync {
    /// Create the events table if absent. Idempotent.
    fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Insert rows as a single request.
    fn insert(&self, rows: &[EventRow]) -> Result<(), StoreError>;

    /// Run a statement with bound parameters and decode the result set.
    fn query(
        &self,
        sql: &str,
        params: &QueryParams,
        options: QueryOptions,
    ) -> Result<QueryResult, StoreError>;

    /// Run a statement that returns no rows (DDL).
    fn command(&self, sql: &str) -> Result<(), StoreError>;

    /// Round-trip to the server; returns its version string.
    fn ping(&self) -> Result<String, StoreError>;

    /// `database.table` the events live in.
    fn events_table(&self) -> String;

    fn database(&self) -> &str;
}
