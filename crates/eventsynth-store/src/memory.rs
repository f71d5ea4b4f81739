//! In-process store for tests and offline runs.
//!
//! Records every call. Queries return a scripted result when one is queued;
//! otherwise they are answered from the stored rows using only the bound
//! `user_id`, `event_name` and `limit` parameters (newest first). SQL text is
//! recorded, not interpreted.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::params::{ParamValue, QueryParams};
use crate::result::{Cell, Column, QueryResult};
use crate::row::{EventRow, COLUMNS};
use crate::store::{EventStore, QueryOptions};
use crate::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedQuery {
    pub sql: String,
    pub params: QueryParams,
    pub options: QueryOptions,
}

#[derive(Default)]
struct State {
    schema_calls: usize,
    schema_ready: bool,
    rows: Vec<EventRow>,
    /// Size of every insert attempt, failed ones included.
    insert_attempts: Vec<usize>,
    insert_failures: HashMap<usize, StoreError>,
    queries: Vec<RecordedQuery>,
    query_results: VecDeque<Result<QueryResult, StoreError>>,
    commands: Vec<String>,
    down: Option<StoreError>,
}

pub struct MemoryStore {
    database: String,
    table: String,
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            database: "default".to_string(),
            table: "events".to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// Fail the `attempt`-th insert call (0-based, counting failed attempts).
    pub fn fail_insert_attempt(&self, attempt: usize, error: StoreError) {
        self.state.lock().insert_failures.insert(attempt, error);
    }

    /// Queue the result of the next `query` call.
    pub fn push_query_result(&self, result: Result<QueryResult, StoreError>) {
        self.state.lock().query_results.push_back(result);
    }

    /// Every call fails with `error` until cleared with `None`.
    pub fn set_down(&self, error: Option<StoreError>) {
        self.state.lock().down = error;
    }

    pub fn rows(&self) -> Vec<EventRow> {
        self.state.lock().rows.clone()
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn insert_attempts(&self) -> Vec<usize> {
        self.state.lock().insert_attempts.clone()
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.state.lock().queries.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn schema_calls(&self) -> usize {
        self.state.lock().schema_calls
    }

    pub fn schema_ready(&self) -> bool {
        self.state.lock().schema_ready
    }

    fn check_up(state: &State) -> Result<(), StoreError> {
        match &state.down {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn answer_from_rows(rows: &[EventRow], params: &QueryParams) -> QueryResult {
        let wanted = |name: &str| params.get(name).and_then(ParamValue::as_str);
        let user = wanted("user_id");
        let event_name = wanted("event_name");
        let limit = params
            .get("limit")
            .and_then(ParamValue::as_u64)
            .map_or(usize::MAX, |n| n as usize);

        let mut hits: Vec<&EventRow> = rows
            .iter()
            .filter(|r| user.map_or(true, |u| r.user_id == u))
            .filter(|r| event_name.map_or(true, |n| r.event_name == n))
            .collect();
        // The stored text form sorts chronologically.
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        hits.truncate(limit);

        let columns = COLUMNS
            .iter()
            .map(|name| {
                let type_name = if *name == "timestamp" {
                    "DateTime64(3, 'UTC')"
                } else {
                    "String"
                };
                Column::new(*name, type_name)
            })
            .collect();
        let rows = hits
            .into_iter()
            .map(|r| {
                let ts = eventsynth_model::time::parse_timestamp(&r.timestamp)
                    .map(Cell::Timestamp)
                    .unwrap_or_else(|_| Cell::Text(r.timestamp.clone()));
                vec![
                    Cell::Text(r.event_id.clone()),
                    Cell::Text(r.user_id.clone()),
                    Cell::Text(r.event_name.clone()),
                    ts,
                    Cell::Text(r.properties.clone()),
                    Cell::Text(r.site_url.clone()),
                ]
            })
            .collect();
        QueryResult::new(columns, rows)
    }
}

impl EventStore for MemoryStore {
    fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        Self::check_up(&state)?;
        state.schema_calls += 1;
        state.schema_ready = true;
        Ok(())
    }

    fn insert(&self, rows: &[EventRow]) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        Self::check_up(&state)?;
        let attempt = state.insert_attempts.len();
        state.insert_attempts.push(rows.len());
        if let Some(err) = state.insert_failures.remove(&attempt) {
            return Err(err);
        }
        state.rows.extend_from_slice(rows);
        Ok(())
    }

    fn query(
        &self,
        sql: &str,
        params: &QueryParams,
        options: QueryOptions,
    ) -> Result<QueryResult, StoreError> {
        let mut state = self.state.lock();
        Self::check_up(&state)?;
        state.queries.push(RecordedQuery {
            sql: sql.to_string(),
            params: params.clone(),
            options,
        });
        match state.query_results.pop_front() {
            Some(scripted) => scripted,
            None => Ok(Self::answer_from_rows(&state.rows, params)),
        }
    }

    fn command(&self, sql: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        Self::check_up(&state)?;
        state.commands.push(sql.to_string());
        Ok(())
    }

    fn ping(&self) -> Result<String, StoreError> {
        Self::check_up(&self.state.lock())?;
        Ok(format!("memory-{}", env!("CARGO_PKG_VERSION")))
    }

    fn events_table(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    fn database(&self) -> &str {
        &self.database
    }
}
