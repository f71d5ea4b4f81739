//! Value domains for synthesized properties.

use rand::Rng;

pub const PAGES: &[&str] = &[
    "/home",
    "/products",
    "/pricing",
    "/about",
    "/contact",
    "/dashboard",
    "/settings",
    "/checkout",
];

pub const PLATFORMS: &[&str] = &["web", "mobile", "tablet"];
pub const BROWSERS: &[&str] = &["chrome", "firefox", "safari", "edge"];
pub const OPERATING_SYSTEMS: &[&str] = &["windows", "mac", "linux", "ios", "android"];
pub const REFERRERS: &[&str] = &["google", "direct", "facebook", "twitter"];
pub const BUTTON_IDS: &[&str] = &["cta_main", "nav_menu", "buy_now", "learn_more"];
pub const SEARCH_QUERIES: &[&str] = &["pricing", "features", "documentation", "support"];
pub const PAYMENT_METHODS: &[&str] = &["credit_card", "paypal", "stripe"];
pub const SUSPICIOUS_LOCATIONS: &[&str] = &["unknown", "VPN_detected"];

pub const CURRENCY: &str = "USD";

/// Uniform pick from a non-empty domain.
pub(crate) fn pick<R: Rng + ?Sized>(rng: &mut R, domain: &[&str]) -> String {
    domain[rng.gen_range(0..domain.len())].to_string()
}

/// Uniform amount in `[low, high]`, rounded to cents.
pub(crate) fn money<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    (rng.gen_range(low..=high) * 100.0).round() / 100.0
}
