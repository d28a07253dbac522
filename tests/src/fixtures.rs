//! Test fixtures and push generators.

use monitor_core::CapturedPush;
use serde_json::{json, Value};

pub const PAGE_URL: &str = "https://shop.example.com/checkout";
pub const DOMAIN: &str = "shop.example.com";
pub const ORIGIN: &str = "https://shop.example.com";

/// GTM container load.
pub fn gtm_js() -> Value {
    json!({"event": "gtm.js", "gtm.start": 1_700_000_000_000i64})
}

pub fn page_view() -> Value {
    json!({"event": "page_view", "page": {"title": "Checkout", "path": "/checkout"}})
}

pub fn purchase(value: f64) -> Value {
    json!({
        "event": "purchase",
        "ecommerce": {
            "transaction_id": "T-1001",
            "currency": "EUR",
            "value": value,
            "items": [{"item_id": "SKU-1", "quantity": 1}]
        }
    })
}

/// gtag-style argument list.
pub fn gtag_event(name: &str) -> Value {
    json!(["event", name, {"send_to": "G-TEST"}])
}

/// Custom event with a unique name.
pub fn custom(i: usize) -> Value {
    json!({"event": format!("custom_{i}")})
}

/// Push captured at an explicit time.
pub fn push_at(data: Value, timestamp: i64) -> CapturedPush {
    CapturedPush {
        data,
        source: "dataLayer".to_string(),
        data_layer_index: None,
        timestamp: Some(timestamp),
    }
}
