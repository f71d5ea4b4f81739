//! HTTP API over an event store.
//!
//! Routes (a trailing slash is optional):
//! - `POST /api/v1/events/ingest/`  one event object or an array of them
//! - `POST /api/v1/events/batch/`   `{"events": [...]}`
//! - `GET  /api/v1/events/`         `?user_id=&event_name=&limit=`
//! - `GET  /api/v1/health/`
//!
//! Handlers are plain functions over `&dyn EventStore` ([`route`]); the hyper
//! layer only moves bytes and runs them on the blocking pool.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use url::form_urlencoded;

use eventsynth_model::{Event, EventId};
use eventsynth_store::facade::{DEFAULT_EVENT_LIMIT, MAX_EVENT_LIMIT};
use eventsynth_store::{EventFilter, EventRow, EventStore, QueryFacade, StoreError};

const REQUIRED_FIELDS: [&str; 3] = ["user_id", "event_name", "timestamp"];

/// 16 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Written with the bound address once listening.
    pub ready_file: Option<PathBuf>,
    pub max_body_bytes: usize,
}

/// A status code and a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiResponse {
    fn ok<T: Serialize>(status: StatusCode, value: &T) -> Self {
        Self {
            status,
            body: serde_json::to_value(value).unwrap_or_else(|_| json!({"error": "serialize"})),
        }
    }

    fn error(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": msg.into() }),
        }
    }

    fn store_error(e: &StoreError) -> Self {
        let status = if e.is_transient() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::error(status, e.to_string())
    }
}

pub fn serve(config: ServerConfig, store: Arc<dyn EventStore>) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;

    rt.block_on(serve_async(config, store))
}

async fn serve_async(config: ServerConfig, store: Arc<dyn EventStore>) -> Result<()> {
    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|e| anyhow!("serve: failed to bind {}: {e}", config.listen))?;
    let bound = listener
        .local_addr()
        .map_err(|e| anyhow!("serve: failed to read bound addr: {e}"))?;

    tracing::info!(addr = %bound, "listening");
    if let Some(path) = config.ready_file.as_ref() {
        let payload = json!({
            "addr": bound.to_string(),
            "pid": std::process::id(),
        });
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::write(path, serde_json::to_string_pretty(&payload)?)
            .map_err(|e| anyhow!("serve: failed to write ready file {}: {e}", path.display()))?;
    }

    loop {
        let (stream, _peer) = listener
            .accept()
            .await
            .map_err(|e| anyhow!("serve: accept failed: {e}"))?;
        let io = TokioIo::new(stream);
        let store = store.clone();
        let max_body_bytes = config.max_body_bytes;

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, store.clone(), max_body_bytes));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::warn!(error = %e, "connection error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    store: Arc<dyn EventStore>,
    max_body_bytes: usize,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let body = match read_body(req.into_body(), max_body_bytes).await {
        Ok(body) => body,
        Err(resp) => {
            tracing::warn!(%method, path = %path, status = resp.status.as_u16(), "request body rejected");
            return Ok(json_response(resp.status, &resp.body));
        }
    };

    let resp = tokio::task::spawn_blocking({
        let method = method.clone();
        let path = path.clone();
        move || route(&method, &path, query.as_deref(), &body, store.as_ref())
    })
    .await
    .unwrap_or_else(|e| ApiResponse::error(StatusCode::INTERNAL_SERVER_ERROR, format!("handler failed: {e}")));

    tracing::debug!(%method, path = %path, status = resp.status.as_u16(), "request");
    Ok(json_response(resp.status, &resp.body))
}

/// Buffer a request body, refusing anything over `limit` bytes.
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, ApiResponse>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(ApiResponse::error(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Request body exceeds {limit} bytes"),
        )),
        Err(e) => Err(ApiResponse::error(
            StatusCode::BAD_REQUEST,
            format!("Failed to read request body: {e}"),
        )),
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{\"error\":\"serialize\"}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"{\"error\":\"internal\"}"))))
}

/// Dispatch one request. Blocking: calls the store.
pub fn route(
    method: &Method,
    path: &str,
    query: Option<&str>,
    body: &[u8],
    store: &dyn EventStore,
) -> ApiResponse {
    let path = path.trim_end_matches('/');
    let allowed = match path {
        "/api/v1/events/ingest" | "/api/v1/events/batch" => Method::POST,
        "/api/v1/events" | "/api/v1/health" => Method::GET,
        _ => return ApiResponse::error(StatusCode::NOT_FOUND, "not found"),
    };
    if *method != allowed {
        return ApiResponse::error(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("method {method} not allowed; use {allowed}"),
        );
    }

    match path {
        "/api/v1/events/ingest" => handle_ingest(body, store),
        "/api/v1/events/batch" => handle_batch(body, store),
        "/api/v1/events" => handle_query(query.unwrap_or(""), store),
        _ => handle_health(store),
    }
}

fn handle_ingest(body: &[u8], store: &dyn EventStore) -> ApiResponse {
    let parsed: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return ApiResponse::error(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")),
    };

    match parsed {
        Value::Array(items) => {
            let events = match parse_events(items) {
                Ok(events) => events,
                Err(resp) => return resp,
            };
            if let Err(resp) = insert(&events, store) {
                return resp;
            }
            let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
            ApiResponse::ok(
                StatusCode::CREATED,
                &json!({
                    "message": format!("{} events ingested", events.len()),
                    "event_ids": ids,
                }),
            )
        }
        single => {
            let event = match parse_event(single) {
                Ok(event) => event,
                Err(resp) => return resp,
            };
            if let Err(resp) = insert(std::slice::from_ref(&event), store) {
                return resp;
            }
            ApiResponse::ok(
                StatusCode::CREATED,
                &json!({
                    "message": "Event ingested successfully",
                    "event_id": event.event_id.as_str(),
                }),
            )
        }
    }
}

fn handle_batch(body: &[u8], store: &dyn EventStore) -> ApiResponse {
    let parsed: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return ApiResponse::error(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")),
    };
    let items = match parsed.get("events") {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return ApiResponse::error(StatusCode::BAD_REQUEST, "`events` must be an array"),
    };
    let events = match parse_events(items) {
        Ok(events) => events,
        Err(resp) => return resp,
    };
    if let Err(resp) = insert(&events, store) {
        return resp;
    }
    ApiResponse::ok(
        StatusCode::CREATED,
        &json!({ "message": format!("{} events ingested", events.len()) }),
    )
}

fn handle_query(query: &str, store: &dyn EventStore) -> ApiResponse {
    let mut filter = EventFilter {
        limit: DEFAULT_EVENT_LIMIT,
        ..Default::default()
    };
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "user_id" if !value.is_empty() => filter.user_id = Some(value.into_owned()),
            "event_name" if !value.is_empty() => filter.event_name = Some(value.into_owned()),
            "limit" => match value.trim().parse::<u32>() {
                Ok(n) if (1..=MAX_EVENT_LIMIT).contains(&n) => filter.limit = n,
                _ => {
                    return ApiResponse::error(
                        StatusCode::BAD_REQUEST,
                        format!("limit must be an integer between 1 and {MAX_EVENT_LIMIT}"),
                    )
                }
            },
            _ => {}
        }
    }

    match QueryFacade::new(store).query_events(&filter) {
        Ok(events) => ApiResponse::ok(
            StatusCode::OK,
            &json!({ "count": events.len(), "events": events }),
        ),
        Err(e) => ApiResponse::store_error(&e),
    }
}

fn handle_health(store: &dyn EventStore) -> ApiResponse {
    match store.ping() {
        Ok(version) => ApiResponse::ok(
            StatusCode::OK,
            &json!({"status": "healthy", "clickhouse": "connected", "version": version}),
        ),
        Err(e) => ApiResponse::ok(
            StatusCode::OK,
            &json!({"status": "degraded", "clickhouse": "disconnected", "error": e.to_string()}),
        ),
    }
}

fn parse_events(items: Vec<Value>) -> Result<Vec<Event>, ApiResponse> {
    if items.is_empty() {
        return Err(ApiResponse::error(StatusCode::BAD_REQUEST, "No events provided"));
    }
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            parse_event(item).map_err(|mut resp| {
                if let Some(Value::String(msg)) = resp.body.get_mut("error") {
                    *msg = format!("event {i}: {msg}");
                }
                resp
            })
        })
        .collect()
}

/// Validate one submitted event; a missing `event_id` gets a fresh UUID v4.
fn parse_event(value: Value) -> Result<Event, ApiResponse> {
    let Value::Object(mut map) = value else {
        return Err(ApiResponse::error(StatusCode::BAD_REQUEST, "event must be a JSON object"));
    };
    if !map.contains_key("event_name") {
        if let Some(legacy) = map.remove("event") {
            map.insert("event_name".to_string(), legacy);
        }
    }
    for field in REQUIRED_FIELDS {
        if map.get(field).map_or(true, Value::is_null) {
            return Err(ApiResponse::error(
                StatusCode::BAD_REQUEST,
                format!("Missing required field: {field}"),
            ));
        }
    }
    let has_id = matches!(map.get("event_id"), Some(Value::String(s)) if !s.is_empty());
    if !has_id {
        map.insert("event_id".to_string(), Value::String(EventId::new_v4().to_string()));
    }
    if map.get("properties").map_or(false, Value::is_null) {
        map.insert("properties".to_string(), Value::Object(Map::new()));
    }

    serde_json::from_value(Value::Object(map))
        .map_err(|e| ApiResponse::error(StatusCode::BAD_REQUEST, format!("invalid event: {e}")))
}

fn insert(events: &[Event], store: &dyn EventStore) -> Result<(), ApiResponse> {
    let rows: Vec<EventRow> = events.iter().map(EventRow::from_event).collect();
    store.insert(&rows).map_err(|e| {
        tracing::error!(error = %e, rows = rows.len(), "ingest insert failed");
        ApiResponse::store_error(&e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventsynth_store::MemoryStore;

    fn call(store: &MemoryStore, method: Method, path: &str, query: Option<&str>, body: Value) -> ApiResponse {
        let bytes = if body.is_null() {
            Vec::new()
        } else {
            serde_json::to_vec(&body).unwrap()
        };
        route(&method, path, query, &bytes, store)
    }

    fn event_json(user: &str, name: &str, ts: &str) -> Value {
        json!({"user_id": user, "event_name": name, "timestamp": ts, "properties": {"page": "/home"}})
    }

    #[test]
    fn ingest_single_event_generates_id() {
        let store = MemoryStore::new();
        let resp = call(
            &store,
            Method::POST,
            "/api/v1/events/ingest/",
            None,
            event_json("user_1", "page_view", "2024-05-01T03:15:00Z"),
        );
        assert_eq!(resp.status, StatusCode::CREATED);
        assert_eq!(resp.body["message"], "Event ingested successfully");
        let id = resp.body["event_id"].as_str().unwrap();
        assert_eq!(id.len(), 36);

        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_id, id);
        assert_eq!(rows[0].site_url, "https://example.com");
        assert_eq!(rows[0].timestamp, "2024-05-01 03:15:00.000");
    }

    #[test]
    fn ingest_keeps_client_event_id_and_accepts_arrays() {
        let store = MemoryStore::new();
        let mut a = event_json("user_1", "search", "2024-05-01T03:15:00Z");
        a["event_id"] = json!("client-1");
        let b = event_json("user_2", "logout", "2024-05-01 03:16:00");
        let resp = call(&store, Method::POST, "/api/v1/events/ingest", None, json!([a, b]));
        assert_eq!(resp.status, StatusCode::CREATED);
        assert_eq!(resp.body["message"], "2 events ingested");
        assert_eq!(resp.body["event_ids"][0], "client-1");
        assert_eq!(store.insert_attempts(), vec![2]);
    }

    #[test]
    fn missing_required_field_is_rejected_without_insert() {
        let store = MemoryStore::new();
        let resp = call(
            &store,
            Method::POST,
            "/api/v1/events/ingest/",
            None,
            json!({"user_id": "user_1", "event_name": "page_view"}),
        );
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.body["error"], "Missing required field: timestamp");
        assert!(store.insert_attempts().is_empty());

        let resp = call(
            &store,
            Method::POST,
            "/api/v1/events/ingest/",
            None,
            json!({"user_id": "u", "event_name": "teleport", "timestamp": "2024-05-01T00:00:00Z"}),
        );
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert!(resp.body["error"].as_str().unwrap().contains("teleport"));
    }

    #[test]
    fn batch_requires_events() {
        let store = MemoryStore::new();
        let resp = call(&store, Method::POST, "/api/v1/events/batch/", None, json!({"events": []}));
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.body["error"], "No events provided");

        let events: Vec<Value> = (0..3)
            .map(|i| event_json(&format!("user_{i}"), "button_click", "2024-05-01T03:15:00Z"))
            .collect();
        let resp = call(&store, Method::POST, "/api/v1/events/batch/", None, json!({"events": events}));
        assert_eq!(resp.status, StatusCode::CREATED);
        assert_eq!(resp.body["message"], "3 events ingested");
        assert_eq!(store.row_count(), 3);
    }

    #[test]
    fn query_filters_and_validates_limit() {
        let store = MemoryStore::new();
        let events: Vec<Value> = vec![
            event_json("user_1", "page_view", "2024-05-01T03:15:00Z"),
            event_json("user_1", "page_view", "2024-05-01T03:17:00Z"),
            event_json("user_2", "page_view", "2024-05-01T03:16:00Z"),
        ];
        call(&store, Method::POST, "/api/v1/events/batch/", None, json!({"events": events}));

        let resp = call(&store, Method::GET, "/api/v1/events/", Some("user_id=user_1&limit=10"), Value::Null);
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body["count"], 2);
        assert_eq!(resp.body["events"][0]["timestamp"], "2024-05-01T03:17:00Z");
        assert_eq!(resp.body["events"][0]["properties"]["page"], "/home");

        let recorded = store.queries();
        let last = recorded.last().unwrap();
        assert!(!last.sql.contains("user_1"));

        for bad in ["limit=0", "limit=abc", "limit=10001"] {
            let resp = call(&store, Method::GET, "/api/v1/events/", Some(bad), Value::Null);
            assert_eq!(resp.status, StatusCode::BAD_REQUEST, "{bad}");
        }
    }

    #[test]
    fn store_failures_map_to_status_codes() {
        let store = MemoryStore::new();
        store.set_down(Some(StoreError::Unreachable {
            url: "http://ch:8123/".into(),
            message: "connection refused".into(),
        }));
        let resp = call(
            &store,
            Method::POST,
            "/api/v1/events/ingest/",
            None,
            event_json("user_1", "page_view", "2024-05-01T03:15:00Z"),
        );
        assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);

        let health = call(&store, Method::GET, "/api/v1/health/", None, Value::Null);
        assert_eq!(health.body["status"], "degraded");
        assert_eq!(health.body["clickhouse"], "disconnected");

        store.set_down(None);
        store.push_query_result(Err(StoreError::Http {
            status: 404,
            body: "Code: 60. DB::Exception: Unknown table".into(),
        }));
        let resp = call(&store, Method::GET, "/api/v1/events/", None, Value::Null);
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn unknown_routes_and_methods() {
        let store = MemoryStore::new();
        assert_eq!(
            call(&store, Method::GET, "/nope", None, Value::Null).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            call(&store, Method::GET, "/api/v1/events/ingest/", None, Value::Null).status,
            StatusCode::METHOD_NOT_ALLOWED
        );
        let health = call(&store, Method::GET, "/api/v1/health", None, Value::Null);
        assert_eq!(health.status, StatusCode::OK);
        assert_eq!(health.body["status"], "healthy");
    }

    #[test]
    fn ingest_keeps_client_values_of_any_shape() {
        let store = MemoryStore::new();
        let body = json!({
            "user_id": "user_8",
            "event_name": "payment_failed",
            "timestamp": "2024-05-01T03:15:00Z",
            "properties": {"error_code": "E42", "retry_count": null}
        });
        let resp = call(&store, Method::POST, "/api/v1/events/ingest/", None, body);
        assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.body);

        let resp = call(&store, Method::GET, "/api/v1/events/", Some("user_id=user_8"), Value::Null);
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body["count"], 1);
        assert_eq!(resp.body["events"][0]["properties"], json!({"error_code": "E42", "retry_count": null}));
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let small = Full::new(Bytes::from_static(b"{\"events\": []}"));
        assert_eq!(read_body(small, 64).await.unwrap(), Bytes::from_static(b"{\"events\": []}"));

        let large = Full::new(Bytes::from(vec![b'x'; 65]));
        let resp = read_body(large, 64).await.unwrap_err();
        assert_eq!(resp.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(resp.body["error"], "Request body exceeds 64 bytes");
    }
}
