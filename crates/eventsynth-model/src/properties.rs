//! Per-kind property payloads.
//!
//! Properties are stored as a JSON object in the `properties` column. In memory
//! each [`EventKind`] owns its own field set; keys we do not model (for example
//! fields sent by a client through the ingest endpoint) are kept in `extra` so
//! the JSON form survives a decode/encode cycle.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::{EventError, EventKind};

/// Unmodelled property keys, preserved verbatim.
pub type ExtraProperties = Map<String, Value>;

/// `payment_failed` message produced by the rapid-then-fail pattern.
pub const DATABASE_TIMEOUT: &str = "database_timeout";

/// `payment_failed` message produced by the cart-abandonment pattern.
pub const CARD_DECLINED: &str = "card_declined_insufficient_funds";

/// Device/browser context attached to most events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageViewProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_rapid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_pattern: Option<bool>,
    #[serde(flatten)]
    pub client: ClientContext,
    #[serde(flatten)]
    pub extra: ExtraProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ButtonClickProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(flatten)]
    pub client: ClientContext,
    #[serde(flatten)]
    pub extra: ExtraProperties,
}

/// Kinds that carry no fields of their own (`form_submit`, `video_play`, `logout`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionProps {
    #[serde(flatten)]
    pub client: ClientContext,
    #[serde(flatten)]
    pub extra: ExtraProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_count: Option<u32>,
    #[serde(flatten)]
    pub client: ClientContext,
    #[serde(flatten)]
    pub extra: ExtraProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddToCartProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abandoned_cart: Option<bool>,
    #[serde(flatten)]
    pub client: ClientContext,
    #[serde(flatten)]
    pub extra: ExtraProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckoutStartProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abandoned_cart: Option<bool>,
    #[serde(flatten)]
    pub client: ClientContext,
    #[serde(flatten)]
    pub extra: ExtraProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentSuccessProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unusual_hour: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(flatten)]
    pub client: ClientContext,
    #[serde(flatten)]
    pub extra: ExtraProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentFailedProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(flatten)]
    pub client: ClientContext,
    #[serde(flatten)]
    pub extra: ExtraProperties,
}

/// Property payload tagged by event kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    PageView(PageViewProps),
    ButtonClick(ButtonClickProps),
    FormSubmit(InteractionProps),
    VideoPlay(InteractionProps),
    Search(SearchProps),
    AddToCart(AddToCartProps),
    CheckoutStart(CheckoutStartProps),
    PaymentSuccess(PaymentSuccessProps),
    PaymentFailed(PaymentFailedProps),
    Logout(InteractionProps),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::PageView(_) => EventKind::PageView,
            EventPayload::ButtonClick(_) => EventKind::ButtonClick,
            EventPayload::FormSubmit(_) => EventKind::FormSubmit,
            EventPayload::VideoPlay(_) => EventKind::VideoPlay,
            EventPayload::Search(_) => EventKind::Search,
            EventPayload::AddToCart(_) => EventKind::AddToCart,
            EventPayload::CheckoutStart(_) => EventKind::CheckoutStart,
            EventPayload::PaymentSuccess(_) => EventKind::PaymentSuccess,
            EventPayload::PaymentFailed(_) => EventKind::PaymentFailed,
            EventPayload::Logout(_) => EventKind::Logout,
        }
    }

    /// An empty payload of the given kind.
    pub fn empty(kind: EventKind) -> Self {
        match kind {
            EventKind::PageView => EventPayload::PageView(Default::default()),
            EventKind::ButtonClick => EventPayload::ButtonClick(Default::default()),
            EventKind::FormSubmit => EventPayload::FormSubmit(Default::default()),
            EventKind::VideoPlay => EventPayload::VideoPlay(Default::default()),
            EventKind::Search => EventPayload::Search(Default::default()),
            EventKind::AddToCart => EventPayload::AddToCart(Default::default()),
            EventKind::CheckoutStart => EventPayload::CheckoutStart(Default::default()),
            EventKind::PaymentSuccess => EventPayload::PaymentSuccess(Default::default()),
            EventKind::PaymentFailed => EventPayload::PaymentFailed(Default::default()),
            EventKind::Logout => EventPayload::Logout(Default::default()),
        }
    }

    /// Decode a JSON property object for `kind`.
    ///
    /// A modelled key whose value is `null` or does not fit its field type is
    /// kept verbatim in `extra`, so the object re-encodes unchanged.
    pub fn from_properties(kind: EventKind, properties: ExtraProperties) -> Result<Self, EventError> {
        let decoded = match kind {
            EventKind::PageView => decode_lossless(properties).map(|(p, raw)| (EventPayload::PageView(p), raw)),
            EventKind::ButtonClick => {
                decode_lossless(properties).map(|(p, raw)| (EventPayload::ButtonClick(p), raw))
            }
            EventKind::FormSubmit => {
                decode_lossless(properties).map(|(p, raw)| (EventPayload::FormSubmit(p), raw))
            }
            EventKind::VideoPlay => {
                decode_lossless(properties).map(|(p, raw)| (EventPayload::VideoPlay(p), raw))
            }
            EventKind::Search => decode_lossless(properties).map(|(p, raw)| (EventPayload::Search(p), raw)),
            EventKind::AddToCart => {
                decode_lossless(properties).map(|(p, raw)| (EventPayload::AddToCart(p), raw))
            }
            EventKind::CheckoutStart => {
                decode_lossless(properties).map(|(p, raw)| (EventPayload::CheckoutStart(p), raw))
            }
            EventKind::PaymentSuccess => {
                decode_lossless(properties).map(|(p, raw)| (EventPayload::PaymentSuccess(p), raw))
            }
            EventKind::PaymentFailed => {
                decode_lossless(properties).map(|(p, raw)| (EventPayload::PaymentFailed(p), raw))
            }
            EventKind::Logout => decode_lossless(properties).map(|(p, raw)| (EventPayload::Logout(p), raw)),
        };
        let (mut payload, raw) = decoded.map_err(|source| EventError::InvalidProperties { kind, source })?;
        payload.extra_mut().extend(raw);
        Ok(payload)
    }

    /// Encode back to the JSON property object.
    pub fn to_properties(&self) -> ExtraProperties {
        let value = match self {
            EventPayload::PageView(p) => serde_json::to_value(p),
            EventPayload::ButtonClick(p) => serde_json::to_value(p),
            EventPayload::FormSubmit(p) | EventPayload::VideoPlay(p) | EventPayload::Logout(p) => {
                serde_json::to_value(p)
            }
            EventPayload::Search(p) => serde_json::to_value(p),
            EventPayload::AddToCart(p) => serde_json::to_value(p),
            EventPayload::CheckoutStart(p) => serde_json::to_value(p),
            EventPayload::PaymentSuccess(p) => serde_json::to_value(p),
            EventPayload::PaymentFailed(p) => serde_json::to_value(p),
        };
        // Plain structs of strings/numbers/bools always encode to an object.
        match value {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn client(&self) -> &ClientContext {
        match self {
            EventPayload::PageView(p) => &p.client,
            EventPayload::ButtonClick(p) => &p.client,
            EventPayload::FormSubmit(p) | EventPayload::VideoPlay(p) | EventPayload::Logout(p) => {
                &p.client
            }
            EventPayload::Search(p) => &p.client,
            EventPayload::AddToCart(p) => &p.client,
            EventPayload::CheckoutStart(p) => &p.client,
            EventPayload::PaymentSuccess(p) => &p.client,
            EventPayload::PaymentFailed(p) => &p.client,
        }
    }

    /// Unmodelled and non-conforming keys.
    pub fn extra(&self) -> &ExtraProperties {
        match self {
            EventPayload::PageView(p) => &p.extra,
            EventPayload::ButtonClick(p) => &p.extra,
            EventPayload::FormSubmit(p) | EventPayload::VideoPlay(p) | EventPayload::Logout(p) => {
                &p.extra
            }
            EventPayload::Search(p) => &p.extra,
            EventPayload::AddToCart(p) => &p.extra,
            EventPayload::CheckoutStart(p) => &p.extra,
            EventPayload::PaymentSuccess(p) => &p.extra,
            EventPayload::PaymentFailed(p) => &p.extra,
        }
    }

    fn extra_mut(&mut self) -> &mut ExtraProperties {
        match self {
            EventPayload::PageView(p) => &mut p.extra,
            EventPayload::ButtonClick(p) => &mut p.extra,
            EventPayload::FormSubmit(p) | EventPayload::VideoPlay(p) | EventPayload::Logout(p) => {
                &mut p.extra
            }
            EventPayload::Search(p) => &mut p.extra,
            EventPayload::AddToCart(p) => &mut p.extra,
            EventPayload::CheckoutStart(p) => &mut p.extra,
            EventPayload::PaymentSuccess(p) => &mut p.extra,
            EventPayload::PaymentFailed(p) => &mut p.extra,
        }
    }

    /// The anomaly marker carried by this payload, if any.
    pub fn anomaly_marker(&self) -> Option<AnomalyMarker> {
        match self {
            EventPayload::PageView(p) if p.is_rapid == Some(true) => Some(AnomalyMarker::RapidPageView),
            EventPayload::PageView(p) if p.bot_pattern == Some(true) => Some(AnomalyMarker::BotPattern),
            EventPayload::AddToCart(p) if p.abandoned_cart == Some(true) => {
                Some(AnomalyMarker::AbandonedCart)
            }
            EventPayload::CheckoutStart(p) if p.abandoned_cart == Some(true) => {
                Some(AnomalyMarker::AbandonedCart)
            }
            EventPayload::PaymentSuccess(p) if p.unusual_hour == Some(true) => {
                Some(AnomalyMarker::UnusualHour)
            }
            EventPayload::PaymentFailed(p) => match p.message.as_deref() {
                Some(DATABASE_TIMEOUT) => Some(AnomalyMarker::DatabaseTimeout),
                Some(CARD_DECLINED) => Some(AnomalyMarker::CardDeclined),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Split `properties` into keys `T` holds exactly and keys it would lose,
/// then decode `T` from the former.
///
/// A key conforms when decoding it alone into `T` and encoding back yields the
/// same JSON. `null`, mistyped values and numbers whose form would change
/// (`5` read into an `f64` field) are returned as raw keys.
fn decode_lossless<T>(properties: ExtraProperties) -> Result<(T, ExtraProperties), serde_json::Error>
where
    T: DeserializeOwned + Serialize,
{
    let mut conforming = Map::new();
    let mut raw = Map::new();
    for (key, value) in properties {
        if !value.is_null() && conforms::<T>(&key, &value) {
            conforming.insert(key, value);
        } else {
            raw.insert(key, value);
        }
    }
    let decoded = serde_json::from_value(Value::Object(conforming))?;
    Ok((decoded, raw))
}

fn conforms<T>(key: &str, value: &Value) -> bool
where
    T: DeserializeOwned + Serialize,
{
    let single = Value::Object(Map::from_iter([(key.to_string(), value.clone())]));
    serde_json::from_value::<T>(single.clone())
        .and_then(|decoded| serde_json::to_value(&decoded))
        .is_ok_and(|back| back == single)
}

/// Why an event counts as anomalous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMarker {
    /// `page_view` with `is_rapid=true`.
    RapidPageView,
    /// `payment_failed` with message `database_timeout`.
    DatabaseTimeout,
    /// `add_to_cart`/`checkout_start` with `abandoned_cart=true`.
    AbandonedCart,
    /// `payment_failed` with message `card_declined_insufficient_funds`.
    CardDeclined,
    /// `page_view` with `bot_pattern=true`.
    BotPattern,
    /// `payment_success` with `unusual_hour=true`.
    UnusualHour,
}

impl AnomalyMarker {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyMarker::RapidPageView => "is_rapid",
            AnomalyMarker::DatabaseTimeout => DATABASE_TIMEOUT,
            AnomalyMarker::AbandonedCart => "abandoned_cart",
            AnomalyMarker::CardDeclined => CARD_DECLINED,
            AnomalyMarker::BotPattern => "bot_pattern",
            AnomalyMarker::UnusualHour => "unusual_hour",
        }
    }
}

impl fmt::Display for AnomalyMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> ExtraProperties {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn page_view_keeps_modelled_and_unknown_keys() {
        let props = obj(json!({
            "page": "/pricing",
            "browser": "chrome",
            "session_duration": 5,
            "bot_pattern": true,
            "experiment": "b",
        }));
        let payload = EventPayload::from_properties(EventKind::PageView, props.clone()).unwrap();
        let EventPayload::PageView(p) = &payload else {
            panic!("expected page_view payload");
        };
        assert_eq!(p.page.as_deref(), Some("/pricing"));
        assert_eq!(p.client.browser.as_deref(), Some("chrome"));
        assert_eq!(p.session_duration, Some(5));
        assert_eq!(p.extra.get("experiment"), Some(&json!("b")));
        assert_eq!(payload.to_properties(), props);
        assert_eq!(payload.anomaly_marker(), Some(AnomalyMarker::BotPattern));
    }

    #[test]
    fn mistyped_modelled_key_is_kept_raw() {
        let props = obj(json!({ "error_code": "E42", "message": "gateway", "retry_count": 1 }));
        let payload = EventPayload::from_properties(EventKind::PaymentFailed, props.clone()).unwrap();
        let EventPayload::PaymentFailed(p) = &payload else {
            panic!("expected payment_failed payload");
        };
        assert_eq!(p.error_code, None);
        assert_eq!(p.message.as_deref(), Some("gateway"));
        assert_eq!(p.retry_count, Some(1));
        assert_eq!(p.extra.get("error_code"), Some(&json!("E42")));
        assert_eq!(payload.to_properties(), props);
    }

    #[test]
    fn null_values_survive_reencode() {
        let props = obj(json!({ "page": null, "referrer": "google", "browser": null, "note": null }));
        let payload = EventPayload::from_properties(EventKind::PageView, props.clone()).unwrap();
        assert_eq!(payload.extra().get("page"), Some(&Value::Null));
        assert_eq!(payload.client().browser, None);
        assert_eq!(payload.to_properties(), props);
    }

    #[test]
    fn numbers_keep_their_written_form() {
        // `price` is an f64 field; an integer stays an integer on the wire.
        let props = obj(json!({ "price": 20, "quantity": 2.5, "product_id": "prod_1" }));
        let payload = EventPayload::from_properties(EventKind::AddToCart, props.clone()).unwrap();
        assert_eq!(payload.to_properties(), props);

        let props = obj(json!({ "price": 19.99, "quantity": 2 }));
        let EventPayload::AddToCart(p) = EventPayload::from_properties(EventKind::AddToCart, props).unwrap() else {
            panic!("expected add_to_cart payload");
        };
        assert_eq!(p.price, Some(19.99));
        assert_eq!(p.quantity, Some(2));
        assert!(p.extra.is_empty());
    }

    #[test]
    fn mistyped_marker_does_not_flag_an_anomaly() {
        let props = obj(json!({ "unusual_hour": "yes", "amount": 900.5 }));
        let payload = EventPayload::from_properties(EventKind::PaymentSuccess, props).unwrap();
        assert_eq!(payload.anomaly_marker(), None);
    }

    #[test]
    fn payment_failed_markers_follow_message() {
        let timeout = EventPayload::PaymentFailed(PaymentFailedProps {
            message: Some(DATABASE_TIMEOUT.to_string()),
            ..Default::default()
        });
        let declined = EventPayload::PaymentFailed(PaymentFailedProps {
            message: Some(CARD_DECLINED.to_string()),
            ..Default::default()
        });
        let plain = EventPayload::empty(EventKind::PaymentFailed);
        assert_eq!(timeout.anomaly_marker(), Some(AnomalyMarker::DatabaseTimeout));
        assert_eq!(declined.anomaly_marker(), Some(AnomalyMarker::CardDeclined));
        assert_eq!(plain.anomaly_marker(), None);
    }

    #[test]
    fn empty_payload_reports_its_kind() {
        for kind in EventKind::ALL {
            let payload = EventPayload::empty(kind);
            assert_eq!(payload.kind(), kind);
            assert!(payload.to_properties().is_empty());
        }
    }
}
