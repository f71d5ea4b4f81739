//! Event synthesis: normal events and the four anomaly patterns.
//!
//! Pattern timings and value ranges are what downstream analysis looks for,
//! so they are fixed:
//!
//! | pattern | events | spacing | marker |
//! |---|---|---|---|
//! | rapid-then-fail | 10 `page_view` + `payment_failed` @ 2m30s | 12 s | `is_rapid`, `database_timeout` |
//! | cart abandonment | 3-5 `add_to_cart`, `checkout_start` @ 10m, `payment_failed` @ 12m | 2 min | `abandoned_cart`, `card_declined_insufficient_funds` |
//! | bot-like | 15 identical `page_view` | 5 s | `bot_pattern` |
//! | late-night high value | 5 `payment_success` in 03:00-03:59, 800-2000 USD | 1 min | `unusual_hour` |

use chrono::{DateTime, Duration, Timelike, Utc};
use rand::Rng;
use serde::Serialize;
use std::fmt;

use eventsynth_model::properties::*;
use eventsynth_model::{Event, EventId, EventKind};

use crate::domains::{self, money, pick};

/// One normal event: uniform kind, independent uniform draws per property.
pub fn normal_event<R: Rng + ?Sized>(rng: &mut R, user_id: &str, timestamp: DateTime<Utc>) -> Event {
    let kind = EventKind::ALL[rng.gen_range(0..EventKind::ALL.len())];
    let event_id = EventId::random(rng);
    let client = ClientContext {
        platform: Some(pick(rng, domains::PLATFORMS)),
        browser: Some(pick(rng, domains::BROWSERS)),
        os: Some(pick(rng, domains::OPERATING_SYSTEMS)),
    };

    let payload = match kind {
        EventKind::PageView => EventPayload::PageView(PageViewProps {
            page: Some(pick(rng, domains::PAGES)),
            referrer: Some(pick(rng, domains::REFERRERS)),
            session_duration: Some(rng.gen_range(10..=600)),
            client,
            ..Default::default()
        }),
        EventKind::ButtonClick => EventPayload::ButtonClick(ButtonClickProps {
            button_id: Some(pick(rng, domains::BUTTON_IDS)),
            page: Some(pick(rng, domains::PAGES)),
            client,
            ..Default::default()
        }),
        EventKind::PaymentSuccess => EventPayload::PaymentSuccess(PaymentSuccessProps {
            amount: Some(money(rng, 10.0, 500.0)),
            currency: Some(domains::CURRENCY.to_string()),
            payment_method: Some(pick(rng, domains::PAYMENT_METHODS)),
            client,
            ..Default::default()
        }),
        EventKind::Search => EventPayload::Search(SearchProps {
            query: Some(pick(rng, domains::SEARCH_QUERIES)),
            results_count: Some(rng.gen_range(0..=100)),
            client,
            ..Default::default()
        }),
        other => with_client(EventPayload::empty(other), client),
    };

    Event::new(event_id, user_id, timestamp, payload)
}

fn with_client(payload: EventPayload, client: ClientContext) -> EventPayload {
    match payload {
        EventPayload::FormSubmit(p) => EventPayload::FormSubmit(InteractionProps { client, ..p }),
        EventPayload::VideoPlay(p) => EventPayload::VideoPlay(InteractionProps { client, ..p }),
        EventPayload::Logout(p) => EventPayload::Logout(InteractionProps { client, ..p }),
        EventPayload::AddToCart(p) => EventPayload::AddToCart(AddToCartProps { client, ..p }),
        EventPayload::CheckoutStart(p) => {
            EventPayload::CheckoutStart(CheckoutStartProps { client, ..p })
        }
        EventPayload::PaymentFailed(p) => {
            EventPayload::PaymentFailed(PaymentFailedProps { client, ..p })
        }
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyPattern {
    RapidThenFail,
    CartAbandonment,
    BotLike,
    LateNightHighValue,
}

impl AnomalyPattern {
    pub const ALL: [AnomalyPattern; 4] = [
        AnomalyPattern::RapidThenFail,
        AnomalyPattern::CartAbandonment,
        AnomalyPattern::BotLike,
        AnomalyPattern::LateNightHighValue,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyPattern::RapidThenFail => "rapid_then_fail",
            AnomalyPattern::CartAbandonment => "cart_abandonment",
            AnomalyPattern::BotLike => "bot_like",
            AnomalyPattern::LateNightHighValue => "late_night_high_value",
        }
    }

    /// What an analyst should look for.
    pub fn description(self) -> &'static str {
        match self {
            AnomalyPattern::RapidThenFail => {
                "Rapid page views (10 in <2 min) -> payment_failed with database_timeout"
            }
            AnomalyPattern::CartAbandonment => {
                "Cart abandonment -> payment_failed with card_declined"
            }
            AnomalyPattern::BotLike => "Bot patterns (identical events at regular intervals)",
            AnomalyPattern::LateNightHighValue => {
                "Late night high-value transactions (3-4 AM, $800-2000)"
            }
        }
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    pub fn generate<R: Rng + ?Sized>(
        self,
        rng: &mut R,
        user_id: &str,
        start: DateTime<Utc>,
    ) -> AnomalyBurst {
        let events = match self {
            AnomalyPattern::RapidThenFail => rapid_then_fail(rng, user_id, start),
            AnomalyPattern::CartAbandonment => cart_abandonment(rng, user_id, start),
            AnomalyPattern::BotLike => bot_like(rng, user_id, start),
            AnomalyPattern::LateNightHighValue => late_night_high_value(rng, user_id, start),
        };
        AnomalyBurst {
            pattern: self,
            user_id: user_id.to_string(),
            events,
        }
    }
}

impl fmt::Display for AnomalyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered run of events for one user, built in one go and never changed.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyBurst {
    pattern: AnomalyPattern,
    user_id: String,
    events: Vec<Event>,
}

impl AnomalyBurst {
    pub fn pattern(&self) -> AnomalyPattern {
        self.pattern
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

pub fn rapid_then_fail<R: Rng + ?Sized>(rng: &mut R, user_id: &str, start: DateTime<Utc>) -> Vec<Event> {
    let mut events = Vec::with_capacity(11);
    for i in 0..10 {
        let payload = EventPayload::PageView(PageViewProps {
            page: Some(pick(rng, domains::PAGES)),
            session_duration: Some(rng.gen_range(5..=15)),
            is_rapid: Some(true),
            client: ClientContext {
                platform: Some("web".to_string()),
                browser: Some("chrome".to_string()),
                os: None,
            },
            ..Default::default()
        });
        let ts = start + Duration::seconds(12 * i);
        events.push(Event::new(EventId::random(rng), user_id, ts, payload));
    }

    let failed = EventPayload::PaymentFailed(PaymentFailedProps {
        error_code: Some(500),
        message: Some(DATABASE_TIMEOUT.to_string()),
        amount: Some(money(rng, 50.0, 500.0)),
        payment_method: Some("credit_card".to_string()),
        retry_count: Some(0),
        ..Default::default()
    });
    events.push(Event::new(
        EventId::random(rng),
        user_id,
        start + Duration::seconds(150),
        failed,
    ));
    events
}

pub fn cart_abandonment<R: Rng + ?Sized>(rng: &mut R, user_id: &str, start: DateTime<Utc>) -> Vec<Event> {
    let adds: i64 = rng.gen_range(3..=5);
    let mut events = Vec::with_capacity(adds as usize + 2);
    for i in 0..adds {
        let payload = EventPayload::AddToCart(AddToCartProps {
            product_id: Some(format!("prod_{}", rng.gen_range(100..=999))),
            price: Some(money(rng, 20.0, 200.0)),
            quantity: Some(rng.gen_range(1..=3)),
            abandoned_cart: Some(true),
            ..Default::default()
        });
        let ts = start + Duration::minutes(2 * i);
        events.push(Event::new(EventId::random(rng), user_id, ts, payload));
    }

    let checkout = EventPayload::CheckoutStart(CheckoutStartProps {
        cart_value: Some(money(rng, 100.0, 600.0)),
        item_count: Some(rng.gen_range(3..=5)),
        abandoned_cart: Some(true),
        ..Default::default()
    });
    events.push(Event::new(
        EventId::random(rng),
        user_id,
        start + Duration::minutes(10),
        checkout,
    ));

    let failed = EventPayload::PaymentFailed(PaymentFailedProps {
        error_code: Some(402),
        message: Some(CARD_DECLINED.to_string()),
        amount: Some(money(rng, 100.0, 600.0)),
        payment_method: Some("credit_card".to_string()),
        retry_count: Some(2),
        ..Default::default()
    });
    events.push(Event::new(
        EventId::random(rng),
        user_id,
        start + Duration::minutes(12),
        failed,
    ));
    events
}

pub fn bot_like<R: Rng + ?Sized>(rng: &mut R, user_id: &str, start: DateTime<Utc>) -> Vec<Event> {
    let template = PageViewProps {
        page: Some("/pricing".to_string()),
        session_duration: Some(5),
        bot_pattern: Some(true),
        client: ClientContext {
            platform: Some("web".to_string()),
            browser: Some("chrome".to_string()),
            os: None,
        },
        ..Default::default()
    };
    (0..15)
        .map(|i| {
            Event::new(
                EventId::random(rng),
                user_id,
                start + Duration::seconds(5 * i),
                EventPayload::PageView(template.clone()),
            )
        })
        .collect()
}

pub fn late_night_high_value<R: Rng + ?Sized>(
    rng: &mut R,
    user_id: &str,
    start: DateTime<Utc>,
) -> Vec<Event> {
    // Latest start minute keeps the fifth event inside hour 3.
    let minute: u32 = rng.gen_range(0..=55);
    let late_night = start
        .with_hour(3)
        .and_then(|t| t.with_minute(minute))
        .unwrap_or(start);

    (0..5)
        .map(|i| {
            let payload = EventPayload::PaymentSuccess(PaymentSuccessProps {
                amount: Some(money(rng, 800.0, 2000.0)),
                currency: Some(domains::CURRENCY.to_string()),
                payment_method: Some("credit_card".to_string()),
                unusual_hour: Some(true),
                location: Some(pick(rng, domains::SUSPICIOUS_LOCATIONS)),
                ..Default::default()
            });
            Event::new(
                EventId::random(rng),
                user_id,
                late_night + Duration::minutes(i),
                payload,
            )
        })
        .collect()
}
