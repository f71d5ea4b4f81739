//! Query facade: ad-hoc SQL, rendering, and filtered event reads.

use eventsynth_model::Event;

use crate::params::QueryParams;
use crate::result::QueryResult;
use crate::row::{decode_events, COLUMNS};
use crate::store::{EventStore, QueryOptions};
use crate::StoreError;

/// Rows shown to an agent before the rest are summarised.
pub const AGENT_ROW_CAP: usize = 20;

pub const DEFAULT_EVENT_LIMIT: u32 = 100;
pub const MAX_EVENT_LIMIT: u32 = 10_000;

pub struct QueryFacade<'a, S: EventStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: EventStore + ?Sized> QueryFacade<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn execute(&self, sql: &str, params: &QueryParams) -> Result<QueryResult, StoreError> {
        self.store.query(sql, params, QueryOptions::default())
    }

    pub fn execute_readonly(&self, sql: &str) -> Result<QueryResult, StoreError> {
        self.store.query(sql, &QueryParams::new(), QueryOptions::readonly())
    }

    /// Events matching `filter`, newest first. Filter values are bound, never
    /// spliced into the statement.
    pub fn query_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let (sql, params) = filter.to_sql(&self.store.events_table());
        let result = self.store.query(&sql, &params, QueryOptions::readonly())?;
        decode_events(&result)
    }

    /// `SHOW TABLES` for the store's database.
    pub fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        let sql = format!("SHOW TABLES FROM {}", self.store.database());
        let result = self.execute_readonly(&sql)?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.first().map(|c| c.to_string()))
            .collect())
    }

    /// `(name, type)` for each column of the events table.
    pub fn describe_events_table(&self) -> Result<Vec<(String, String)>, StoreError> {
        let sql = format!("DESCRIBE TABLE {}", self.store.events_table());
        let result = self.execute_readonly(&sql)?;
        let name = result.column_index("name").unwrap_or(0);
        let type_col = result.column_index("type").unwrap_or(1);
        Ok(result
            .rows
            .iter()
            .filter(|row| row.len() > name.max(type_col))
            .map(|row| (row[name].to_string(), row[type_col].to_string()))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub user_id: Option<String>,
    pub event_name: Option<String>,
    pub limit: u32,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            user_id: None,
            event_name: None,
            limit: DEFAULT_EVENT_LIMIT,
        }
    }
}

impl EventFilter {
    pub fn to_sql(&self, table: &str) -> (String, QueryParams) {
        let mut sql = format!("SELECT {} FROM {table}", COLUMNS.join(", "));
        let mut params = QueryParams::new();
        let mut clauses = Vec::new();
        if let Some(user_id) = &self.user_id {
            clauses.push("user_id = {user_id:String}");
            params = params.bind("user_id", user_id.as_str());
        }
        if let Some(event_name) = &self.event_name {
            clauses.push("event_name = {event_name:String}");
            params = params.bind("event_name", event_name.as_str());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT {limit:UInt32}");
        params = params.bind("limit", self.limit);
        (sql, params)
    }
}

/// Aligned text table: `col | col`, a dashed rule, then rows.
pub fn render_table(result: &QueryResult) -> String {
    let header: Vec<String> = result.columns.iter().map(|c| c.name.clone()).collect();
    let body: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(|c| c.to_string()).collect())
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &body {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{c:<w$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = line(&header);
    out.push('\n');
    let rule_len = widths.iter().sum::<usize>() + 3 * widths.len().saturating_sub(1);
    out.push_str(&"-".repeat(rule_len));
    for row in &body {
        out.push('\n');
        out.push_str(&line(row));
    }
    out
}

/// Column list plus at most `cap` rows, summarising the remainder.
pub fn render_capped(result: &QueryResult, cap: usize) -> String {
    if result.is_empty() {
        return "Query executed successfully but returned 0 rows.".to_string();
    }
    let mut out = format!("Columns: {:?}\n", result.column_names());
    for row in result.rows.iter().take(cap) {
        let cells: Vec<String> = row.iter().map(|c| c.to_literal()).collect();
        out.push('(');
        out.push_str(&cells.join(", "));
        out.push_str(")\n");
    }
    if result.rows.len() > cap {
        out.push_str(&format!(
            "... ({} more rows truncated)\n",
            result.rows.len() - cap
        ));
    }
    out
}

/// SQL tool handed to an analysis agent. Never fails: errors come back as text.
pub struct SqlTool<'a, S: EventStore + ?Sized> {
    facade: QueryFacade<'a, S>,
}

impl<'a, S: EventStore + ?Sized> SqlTool<'a, S> {
    pub const NAME: &'static str = "clickhouse_sql";
    pub const DESCRIPTION: &'static str = "Runs a read-only SQL query against the ClickHouse events table \
(columns: event_id, user_id, event_name, timestamp, properties, site_url; properties is a JSON string). \
Returns the column names and up to 20 rows.";

    pub fn new(store: &'a S) -> Self {
        Self {
            facade: QueryFacade::new(store),
        }
    }

    pub fn run(&self, query: &str) -> String {
        match self.facade.execute_readonly(query) {
            Ok(result) => render_capped(&result, AGENT_ROW_CAP),
            Err(e) => format!("Error executing query: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::result::{Cell, Column};

    fn numbered(n: usize) -> QueryResult {
        QueryResult::new(
            vec![Column::new("user_id", "String"), Column::new("c", "UInt64")],
            (0..n)
                .map(|i| vec![Cell::Text(format!("user_{i}")), Cell::UInt(i as u64)])
                .collect(),
        )
    }

    #[test]
    fn capped_rendering_summarises_overflow() {
        let text = render_capped(&numbered(35), AGENT_ROW_CAP);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], r#"Columns: ["user_id", "c"]"#);
        assert_eq!(lines[1], "('user_0', 0)");
        assert_eq!(lines.len(), 1 + 20 + 1);
        assert_eq!(lines[21], "... (15 more rows truncated)");
    }

    #[test]
    fn capped_rendering_without_overflow() {
        let text = render_capped(&numbered(20), AGENT_ROW_CAP);
        assert!(!text.contains("truncated"));
        assert_eq!(text.lines().count(), 21);
        assert_eq!(
            render_capped(&numbered(0), AGENT_ROW_CAP),
            "Query executed successfully but returned 0 rows."
        );
    }

    #[test]
    fn table_rendering_aligns_columns() {
        let text = render_table(&numbered(2));
        assert_eq!(
            text,
            "user_id | c\n-----------\nuser_0  | 0\nuser_1  | 1"
        );
    }

    #[test]
    fn tool_reports_errors_as_text_and_runs_readonly() {
        let store = MemoryStore::new();
        store.push_query_result(Err(StoreError::Http {
            status: 400,
            body: "Code: 62. DB::Exception: Syntax error".into(),
        }));
        let tool = SqlTool::new(&store);
        let out = tool.run("SELEC 1");
        assert!(out.starts_with("Error executing query: "));
        assert!(out.contains("Syntax error"));
        assert!(store.queries()[0].options.readonly);
        assert_eq!(SqlTool::<MemoryStore>::NAME, "clickhouse_sql");
    }

    #[test]
    fn event_filter_binds_values() {
        let filter = EventFilter {
            user_id: Some("user_1' OR '1'='1".into()),
            event_name: Some("search".into()),
            limit: 5,
        };
        let (sql, params) = filter.to_sql("analytics.events");
        assert_eq!(
            sql,
            "SELECT event_id, user_id, event_name, timestamp, properties, site_url \
             FROM analytics.events WHERE user_id = {user_id:String} AND event_name = {event_name:String} \
             ORDER BY timestamp DESC LIMIT {limit:UInt32}"
        );
        assert!(!sql.contains("OR '1'"));
        assert_eq!(
            params.get("user_id").and_then(|v| v.as_str()),
            Some("user_1' OR '1'='1")
        );
    }

    #[test]
    fn unfiltered_query_has_no_where_clause() {
        let (sql, params) = EventFilter::default().to_sql("db.events");
        assert!(!sql.contains("WHERE"));
        assert_eq!(params.get("limit").and_then(|v| v.as_u64()), Some(100));
    }
}
