//! The `Event` record and its wire form.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::properties::{AnomalyMarker, EventPayload, ExtraProperties};
use crate::{EventError, EventKind};

/// Tenant tag used when an event does not name its site.
pub const DEFAULT_SITE_URL: &str = "https://example.com";

/// Opaque event identifier. Generated events use UUID v4 text; ingested
/// events may carry any non-empty client-chosen string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A UUID v4 drawn from `rng`, so seeded runs produce the same ids.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let bytes: [u8; 16] = rng.gen();
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid().to_string())
    }

    /// A UUID v4 from the OS entropy source.
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One recorded user action.
///
/// Serializes as the flat wire record
/// `{event_id, user_id, event_name, timestamp, properties, site_url}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EventRecord", into = "EventRecord")]
pub struct Event {
    pub event_id: EventId,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
    pub site_url: String,
}

impl Event {
    pub fn new(
        event_id: EventId,
        user_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id,
            user_id: user_id.into(),
            timestamp,
            payload,
            site_url: DEFAULT_SITE_URL.to_string(),
        }
    }

    pub fn with_site_url(mut self, site_url: impl Into<String>) -> Self {
        self.site_url = site_url.into();
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn properties(&self) -> ExtraProperties {
        self.payload.to_properties()
    }

    pub fn anomaly_marker(&self) -> Option<AnomalyMarker> {
        self.payload.anomaly_marker()
    }

    pub fn is_anomaly(&self) -> bool {
        self.anomaly_marker().is_some()
    }
}

/// Untyped wire shape of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub user_id: String,
    #[serde(alias = "event")]
    pub event_name: String,
    #[serde(
        serialize_with = "crate::time::serialize",
        deserialize_with = "crate::time::deserialize"
    )]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub properties: ExtraProperties,
    #[serde(default = "default_site_url")]
    pub site_url: String,
}

fn default_site_url() -> String {
    DEFAULT_SITE_URL.to_string()
}

impl TryFrom<EventRecord> for Event {
    type Error = EventError;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        if record.event_id.trim().is_empty() {
            return Err(EventError::MissingField("event_id"));
        }
        if record.user_id.trim().is_empty() {
            return Err(EventError::MissingField("user_id"));
        }
        let kind: EventKind = record.event_name.parse()?;
        let payload = EventPayload::from_properties(kind, record.properties)?;
        Ok(Event {
            event_id: EventId(record.event_id),
            user_id: record.user_id,
            timestamp: record.timestamp,
            payload,
            site_url: record.site_url,
        })
    }
}

impl From<Event> for EventRecord {
    fn from(event: Event) -> Self {
        EventRecord {
            properties: event.payload.to_properties(),
            event_name: event.payload.kind().as_str().to_string(),
            event_id: event.event_id.0,
            user_id: event.user_id,
            timestamp: event.timestamp,
            site_url: event.site_url,
        }
    }
}
