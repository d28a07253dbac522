//! Event type definitions for the monitor pipeline.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::limits::PERSISTED_MARKER;

/// Fallback name for pushes that do not declare an event.
pub const UNNAMED_EVENT: &str = "message";

/// GA4 recommended commerce event names.
const ECOMMERCE_EVENTS: &[&str] = &[
    "add_payment_info",
    "add_shipping_info",
    "add_to_cart",
    "add_to_wishlist",
    "begin_checkout",
    "purchase",
    "refund",
    "remove_from_cart",
    "select_item",
    "select_promotion",
    "view_cart",
    "view_item",
    "view_item_list",
    "view_promotion",
];

/// A single captured dataLayer push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Process-unique ID (`{timestamp}-{suffix}`)
    pub id: String,
    /// Capture time (epoch ms)
    pub timestamp: i64,
    /// Declared event name
    pub event_name: String,
    /// Raw push payload
    pub data: Value,
    /// Tracked array the push came from
    pub source: String,
    /// Owning group, set by the grouping engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Position in the source array, display only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_layer_index: Option<usize>,
}

impl Event {
    /// Creates an event captured now, deriving its name from the payload.
    pub fn new(data: Value, source: impl Into<String>) -> Self {
        Self::at(Utc::now().timestamp_millis(), data, source)
    }

    /// Creates an event with an explicit capture time.
    pub fn at(timestamp: i64, data: Value, source: impl Into<String>) -> Self {
        Self {
            id: generate_event_id(timestamp),
            timestamp,
            event_name: event_name_from_payload(&data),
            data,
            source: source.into(),
            group_id: None,
            data_layer_index: None,
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.data_layer_index = Some(index);
        self
    }

    /// Whether this event was restored from a persisted snapshot.
    pub fn is_persisted(&self) -> bool {
        self.source.ends_with(PERSISTED_MARKER)
    }

    /// Tags the source as persisted. Idempotent.
    pub fn mark_persisted(&mut self) {
        if !self.is_persisted() {
            self.source.push_str(PERSISTED_MARKER);
        }
    }

    /// Removes every trailing persisted marker from the source.
    pub fn strip_persisted(&mut self) {
        while self.source.ends_with(PERSISTED_MARKER) {
            let len = self.source.len() - PERSISTED_MARKER.len();
            self.source.truncate(len);
        }
    }

    pub fn category(&self) -> EventCategory {
        EventCategory::from_name(&self.event_name)
    }

    /// Pretty JSON of the payload, used for copy and payload search.
    pub fn payload_text(&self) -> String {
        serde_json::to_string_pretty(&self.data).unwrap_or_default()
    }
}

/// Generates an event id from the capture time and a random suffix.
pub fn generate_event_id(timestamp: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", timestamp, &suffix[..9])
}

/// Derives the event name from a push payload.
///
/// Object pushes use their `event` key. gtag-style argument lists use the
/// command, or the event name for `["event", name, ...]`.
pub fn event_name_from_payload(data: &Value) -> String {
    match data {
        Value::Object(map) => match map.get("event") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            _ => UNNAMED_EVENT.to_string(),
        },
        Value::Array(args) => match (args.first(), args.get(1)) {
            (Some(Value::String(cmd)), Some(Value::String(name))) if cmd == "event" => {
                name.clone()
            }
            (Some(Value::String(cmd)), _) if !cmd.is_empty() => cmd.clone(),
            _ => UNNAMED_EVENT.to_string(),
        },
        _ => UNNAMED_EVENT.to_string(),
    }
}

/// Row category derived from the event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Gtm,
    Pageview,
    Ecommerce,
    Consent,
    Custom,
}

impl EventCategory {
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.starts_with("gtm.") {
            Self::Gtm
        } else if lower == "page_view" || lower == "pageview" || lower == "virtual_page_view" {
            Self::Pageview
        } else if ECOMMERCE_EVENTS.contains(&lower.as_str()) {
            Self::Ecommerce
        } else if lower == "consent" || lower.starts_with("consent_") {
            Self::Consent
        } else {
            Self::Custom
        }
    }

    /// Returns the CSS class suffix for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gtm => "gtm",
            Self::Pageview => "pageview",
            Self::Ecommerce => "ecommerce",
            Self::Consent => "consent",
            Self::Custom => "custom",
        }
    }
}

/// A push observed by the page-world capture script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedPush {
    pub data: Value,
    /// Name of the tracked array
    pub source: String,
    #[serde(default)]
    pub data_layer_index: Option<usize>,
    /// Capture time (epoch ms), filled by the page when known
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl CapturedPush {
    pub fn into_event(self) -> Event {
        let timestamp = self.timestamp.unwrap_or_else(|| Utc::now().timestamp_millis());
        let mut event = Event::at(timestamp, self.data, self.source);
        event.data_layer_index = self.data_layer_index;
        event
    }
}

/// Extracts the domain key used for persistence from a page URL.
///
/// Falls back to the raw input when it does not parse as a URL with a host.
pub fn domain_from_url(page_url: &str) -> String {
    url::Url::parse(page_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| page_url.to_string())
}
