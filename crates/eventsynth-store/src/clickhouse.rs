//! ClickHouse over its HTTP interface.
//!
//! - statements are POSTed as the request body (inserts carry the statement
//!   in `query=` and the rows in the body as `JSONEachRow`)
//! - credentials go in `X-ClickHouse-User` / `X-ClickHouse-Key`
//! - results are requested as `JSONCompact` via `default_format`
//! - bound parameters travel as `param_<name>` URL parameters

use reqwest::blocking::{Client, Response};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::params::QueryParams;
use crate::result::QueryResult;
use crate::row::{EventRow, COLUMNS};
use crate::store::{EventStore, QueryOptions};
use crate::{validate_identifier, StoreError};

const HEADER_USER: &str = "X-ClickHouse-User";
const HEADER_KEY: &str = "X-ClickHouse-Key";

/// Response bodies quoted in errors are cut to this many bytes.
const MAX_ERROR_BODY: usize = 2048;

pub struct ClickHouseStore {
    config: StoreConfig,
    client: Client,
    base_url: String,
}

impl ClickHouseStore {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        validate_identifier(&config.database)?;
        validate_identifier(&config.table)?;

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::Transport(format!("failed to build http client: {e}")))?;

        Ok(Self {
            base_url: config.base_url(),
            config,
            client,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// `CREATE TABLE IF NOT EXISTS` for the events table.
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                event_id String,\n    \
                user_id String,\n    \
                event_name LowCardinality(String),\n    \
                timestamp DateTime64(3, 'UTC'),\n    \
                properties String,\n    \
                site_url String DEFAULT '{}'\n\
            ) ENGINE = MergeTree()\nORDER BY (event_name, timestamp)",
            self.config.qualified_table(),
            eventsynth_model::DEFAULT_SITE_URL,
        )
    }

    fn post(&self, url_params: &[(String, String)], body: String) -> Result<String, StoreError> {
        let resp = self
            .client
            .post(&self.base_url)
            .query(&[("database", self.config.database.as_str())])
            .query(url_params)
            .header(HEADER_USER, &self.config.username)
            .header(HEADER_KEY, &self.config.password)
            .body(body)
            .send()
            .map_err(|e| self.transport_error(e))?;
        self.read_body(resp)
    }

    fn read_body(&self, resp: Response) -> Result<String, StoreError> {
        let status = resp.status();
        let text = resp.text().map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            let mut body = text.trim().to_string();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
                body.push_str("...");
            }
            return Err(StoreError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(text)
    }

    fn transport_error(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout(self.config.timeout().unwrap_or_default())
        } else if e.is_connect() {
            StoreError::Unreachable {
                url: self.base_url.clone(),
                message: e.to_string(),
            }
        } else {
            StoreError::Transport(e.to_string())
        }
    }
}

impl EventStore for ClickHouseStore {
    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.command(&self.create_table_sql())?;
        info!(table = %self.config.qualified_table(), "events table ready");
        Ok(())
    }

    fn insert(&self, rows: &[EventRow]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let statement = format!(
            "INSERT INTO {} ({}) FORMAT JSONEachRow",
            self.config.qualified_table(),
            COLUMNS.join(", ")
        );
        let mut body = String::with_capacity(rows.len() * 256);
        for row in rows {
            let line = serde_json::to_string(row).map_err(|e| StoreError::Decode(e.to_string()))?;
            body.push_str(&line);
            body.push('\n');
        }
        debug!(rows = rows.len(), bytes = body.len(), "insert request");
        self.post(&[("query".to_string(), statement)], body)?;
        Ok(())
    }

    fn query(
        &self,
        sql: &str,
        params: &QueryParams,
        options: QueryOptions,
    ) -> Result<QueryResult, StoreError> {
        let mut url_params = vec![("default_format".to_string(), "JSONCompact".to_string())];
        if options.readonly {
            // readonly=2 still lets this request set default_format.
            url_params.push(("readonly".to_string(), "2".to_string()));
        }
        url_params.extend(params.to_http_pairs());
        debug!(sql, params = params.iter().count(), readonly = options.readonly, "query request");
        let body = self.post(&url_params, sql.to_string())?;
        QueryResult::from_json_compact(&body)
    }

    fn command(&self, sql: &str) -> Result<(), StoreError> {
        debug!(sql, "command request");
        self.post(&[], sql.to_string())?;
        Ok(())
    }

    fn ping(&self) -> Result<String, StoreError> {
        let result = self.query("SELECT version()", &QueryParams::new(), QueryOptions::readonly())?;
        result
            .rows
            .first()
            .and_then(|row| row.first())
            .map(|cell| cell.to_string())
            .ok_or_else(|| StoreError::Decode("empty response to SELECT version()".to_string()))
    }

    fn events_table(&self) -> String {
        self.config.qualified_table()
    }

    fn database(&self) -> &str {
        &self.config.database
    }
}
