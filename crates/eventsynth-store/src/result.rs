//! Decoded query results.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use eventsynth_model::time;

use crate::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl Column {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// One value, typed by its column.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// Arrays, maps, tuples and anything without a scalar mapping.
    Json(Value),
}

impl Cell {
    /// Decode a JSON value according to a ClickHouse type name.
    ///
    /// 64-bit integers arrive quoted by default, so numeric columns accept
    /// both numbers and numeric strings.
    pub fn decode(type_name: &str, value: Value) -> Cell {
        if value.is_null() {
            return Cell::Null;
        }
        let base = unwrap_type(type_name);

        if base.starts_with("DateTime") {
            if let Some(ts) = value.as_str().and_then(|s| time::parse_timestamp(s).ok()) {
                return Cell::Timestamp(ts);
            }
        } else if base.starts_with("UInt") {
            if let Some(n) = number_from(&value, Value::as_u64) {
                return Cell::UInt(n);
            }
        } else if base.starts_with("Int") {
            if let Some(n) = number_from(&value, Value::as_i64) {
                return Cell::Int(n);
            }
        } else if base.starts_with("Float") || base.starts_with("Decimal") {
            if let Some(n) = number_from(&value, Value::as_f64) {
                return Cell::Float(n);
            }
        } else if base == "Bool" {
            if let Some(b) = value.as_bool() {
                return Cell::Bool(b);
            }
        }

        match value {
            Value::String(s) => Cell::Text(s),
            Value::Bool(b) => Cell::Bool(b),
            other => Cell::Json(other),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Cell::Timestamp(ts) => Some(*ts),
            Cell::Text(s) => time::parse_timestamp(s).ok(),
            _ => None,
        }
    }

    /// Python-literal-like rendering used by row dumps: strings quoted.
    pub fn to_literal(&self) -> String {
        match self {
            Cell::Text(s) => format!("'{s}'"),
            Cell::Timestamp(ts) => format!("'{}'", time::format_clickhouse(ts)),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "NULL"),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Int(n) => write!(f, "{n}"),
            Cell::UInt(n) => write!(f, "{n}"),
            Cell::Float(n) => write!(f, "{n}"),
            Cell::Text(s) => write!(f, "{s}"),
            Cell::Timestamp(ts) => write!(f, "{}", time::format_clickhouse(ts)),
            Cell::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Strip `Nullable(...)` / `LowCardinality(...)` wrappers.
fn unwrap_type(type_name: &str) -> &str {
    let mut t = type_name.trim();
    loop {
        let inner = ["Nullable(", "LowCardinality("]
            .iter()
            .find_map(|w| t.strip_prefix(w).and_then(|rest| rest.strip_suffix(')')));
        match inner {
            Some(inner) => t = inner,
            None => return t,
        }
    }
}

fn number_from<T: std::str::FromStr>(value: &Value, direct: impl Fn(&Value) -> Option<T>) -> Option<T> {
    direct(value).or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Deserialize)]
struct JsonCompactBody {
    #[serde(default)]
    meta: Vec<Column>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Cell>>) -> Self {
        Self { columns, rows }
    }

    /// Parse a `FORMAT JSONCompact` response body. An empty body (DDL, `INSERT`)
    /// is an empty result.
    pub fn from_json_compact(body: &str) -> Result<Self, StoreError> {
        if body.trim().is_empty() {
            return Ok(Self::default());
        }
        let parsed: JsonCompactBody =
            serde_json::from_str(body).map_err(|e| StoreError::Decode(e.to_string()))?;

        let mut rows = Vec::with_capacity(parsed.data.len());
        for (i, raw) in parsed.data.into_iter().enumerate() {
            if raw.len() != parsed.meta.len() {
                return Err(StoreError::Decode(format!(
                    "row {i} has {} values for {} columns",
                    raw.len(),
                    parsed.meta.len()
                )));
            }
            rows.push(
                parsed
                    .meta
                    .iter()
                    .zip(raw)
                    .map(|(col, v)| Cell::decode(&col.type_name, v))
                    .collect(),
            );
        }
        Ok(Self {
            columns: parsed.meta,
            rows,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn decodes_json_compact_by_column_type() {
        let body = json!({
            "meta": [
                {"name": "event_name", "type": "LowCardinality(String)"},
                {"name": "c", "type": "UInt64"},
                {"name": "ts", "type": "DateTime64(3, 'UTC')"},
                {"name": "avg", "type": "Nullable(Float64)"}
            ],
            "data": [
                ["page_view", "1042", "2024-05-01 03:15:00.000", 12.5],
                ["search", "7", "2024-05-01 03:16:00.000", null]
            ],
            "rows": 2
        })
        .to_string();

        let result = QueryResult::from_json_compact(&body).unwrap();
        assert_eq!(result.column_names(), vec!["event_name", "c", "ts", "avg"]);
        assert_eq!(result.rows[0][0], Cell::Text("page_view".into()));
        assert_eq!(result.rows[0][1], Cell::UInt(1042));
        assert_eq!(
            result.rows[0][2],
            Cell::Timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 3, 15, 0).unwrap())
        );
        assert_eq!(result.rows[0][3], Cell::Float(12.5));
        assert_eq!(result.rows[1][3], Cell::Null);
    }

    #[test]
    fn empty_body_is_empty_result() {
        assert!(QueryResult::from_json_compact("  \n").unwrap().is_empty());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let body = r#"{"meta":[{"name":"a","type":"String"}],"data":[["x","y"]]}"#;
        assert!(matches!(
            QueryResult::from_json_compact(body),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn literal_rendering() {
        assert_eq!(Cell::Text("user_1".into()).to_literal(), "'user_1'");
        assert_eq!(Cell::UInt(3).to_literal(), "3");
        assert_eq!(Cell::Null.to_literal(), "NULL");
    }
}
