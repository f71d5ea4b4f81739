//! The fixed set of event kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::EventError;

/// One user action type. The wire name (`page_view`, ...) is what lands in the
/// `event_name` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PageView,
    ButtonClick,
    FormSubmit,
    VideoPlay,
    Search,
    AddToCart,
    CheckoutStart,
    PaymentSuccess,
    PaymentFailed,
    Logout,
}

impl EventKind {
    /// All kinds, in the order normal-event synthesis draws from.
    pub const ALL: [EventKind; 10] = [
        EventKind::PageView,
        EventKind::ButtonClick,
        EventKind::FormSubmit,
        EventKind::VideoPlay,
        EventKind::Search,
        EventKind::AddToCart,
        EventKind::CheckoutStart,
        EventKind::PaymentSuccess,
        EventKind::PaymentFailed,
        EventKind::Logout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::PageView => "page_view",
            EventKind::ButtonClick => "button_click",
            EventKind::FormSubmit => "form_submit",
            EventKind::VideoPlay => "video_play",
            EventKind::Search => "search",
            EventKind::AddToCart => "add_to_cart",
            EventKind::CheckoutStart => "checkout_start",
            EventKind::PaymentSuccess => "payment_success",
            EventKind::PaymentFailed => "payment_failed",
            EventKind::Logout => "logout",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| EventError::UnknownKind(s.to_string()))
    }
}
