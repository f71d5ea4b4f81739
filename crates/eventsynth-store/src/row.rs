//! Table row encoding and decoding.
//!
//! `properties` is stored as a JSON-encoded string column and decoded back
//! into a structured payload on the read path.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use eventsynth_model::time::format_clickhouse;
use eventsynth_model::{Event, EventKind, EventPayload, ExtraProperties, DEFAULT_SITE_URL};

use crate::result::{Cell, QueryResult};
use crate::StoreError;

/// Column order of the events table.
pub const COLUMNS: [&str; 6] = [
    "event_id",
    "user_id",
    "event_name",
    "timestamp",
    "properties",
    "site_url",
];

/// One `JSONEachRow` insert row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub event_id: String,
    pub user_id: String,
    pub event_name: String,
    /// `YYYY-MM-DD hh:mm:ss.fff`, UTC.
    pub timestamp: String,
    pub properties: String,
    pub site_url: String,
}

impl EventRow {
    pub fn from_event(event: &Event) -> Self {
        Self {
            event_id: event.event_id.to_string(),
            user_id: event.user_id.clone(),
            event_name: event.kind().to_string(),
            timestamp: format_clickhouse(&event.timestamp),
            properties: Value::Object(event.properties()).to_string(),
            site_url: event.site_url.clone(),
        }
    }
}

/// Decode every row of a result selected with the [`COLUMNS`] names.
pub fn decode_events(result: &QueryResult) -> Result<Vec<Event>, StoreError> {
    let idx = |name: &str| {
        result
            .column_index(name)
            .ok_or_else(|| StoreError::Decode(format!("result has no `{name}` column")))
    };
    let id_col = idx("event_id")?;
    let user_col = idx("user_id")?;
    let name_col = idx("event_name")?;
    let ts_col = idx("timestamp")?;
    let props_col = result.column_index("properties");
    let site_col = result.column_index("site_url");

    result
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let text = |col: usize| -> Result<String, StoreError> {
                match &row[col] {
                    Cell::Null => Err(StoreError::Decode(format!("row {i}: NULL in required column"))),
                    other => Ok(other.to_string()),
                }
            };

            let kind: EventKind = text(name_col)?
                .parse()
                .map_err(|e| StoreError::Decode(format!("row {i}: {e}")))?;
            let timestamp = row[ts_col]
                .as_timestamp()
                .ok_or_else(|| StoreError::Decode(format!("row {i}: unreadable timestamp")))?;
            let properties = match props_col.map(|c| &row[c]) {
                Some(Cell::Text(raw)) => parse_properties(raw)
                    .map_err(|e| StoreError::Decode(format!("row {i}: properties: {e}")))?,
                Some(Cell::Json(Value::Object(map))) => map.clone(),
                _ => ExtraProperties::new(),
            };
            let payload = EventPayload::from_properties(kind, properties)
                .map_err(|e| StoreError::Decode(format!("row {i}: {e}")))?;
            let site_url = match site_col.map(|c| &row[c]) {
                Some(Cell::Text(s)) => s.clone(),
                _ => DEFAULT_SITE_URL.to_string(),
            };

            Ok(Event::new(
                eventsynth_model::EventId::new(text(id_col)?),
                text(user_col)?,
                timestamp,
                payload,
            )
            .with_site_url(site_url))
        })
        .collect()
}

fn parse_properties(raw: &str) -> Result<ExtraProperties, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(ExtraProperties::new());
    }
    serde_json::from_str(raw)
}
