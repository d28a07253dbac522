//! Typed message contract shared by every context.
//!
//! Wire shape is `{ "type": "...", "payload": ..., "tabId": ... }`.

use monitor_core::{Error, Event, Result, Settings, SettingsPatch};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::bus::TabId;

pub const GET_EVENTS: &str = "GET_EVENTS";
pub const CLEAR_EVENTS: &str = "CLEAR_EVENTS";
pub const TOGGLE_OVERLAY: &str = "TOGGLE_OVERLAY";
pub const UPDATE_SETTINGS: &str = "UPDATE_SETTINGS";
pub const GET_SETTINGS: &str = "GET_SETTINGS";
pub const GET_OVERLAY_STATE: &str = "GET_OVERLAY_STATE";
pub const PING: &str = "PING";
pub const EVENT_ADDED: &str = "EVENT_ADDED";
pub const EVENTS_UPDATED: &str = "EVENTS_UPDATED";
pub const SETTINGS_UPDATED: &str = "SETTINGS_UPDATED";

/// Every message a context can send or receive.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    GetEvents,
    ClearEvents,
    /// `None` flips the current state
    ToggleOverlay { enabled: Option<bool> },
    UpdateSettings(SettingsPatch),
    GetSettings,
    GetOverlayState,
    Ping,
    /// One-way: a single event was captured
    EventAdded(Event),
    /// One-way: the full event list changed
    EventsUpdated(Vec<Event>),
    /// One-way: settings changed
    SettingsUpdated(Settings),
}

impl Message {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::GetEvents => GET_EVENTS,
            Self::ClearEvents => CLEAR_EVENTS,
            Self::ToggleOverlay { .. } => TOGGLE_OVERLAY,
            Self::UpdateSettings(_) => UPDATE_SETTINGS,
            Self::GetSettings => GET_SETTINGS,
            Self::GetOverlayState => GET_OVERLAY_STATE,
            Self::Ping => PING,
            Self::EventAdded(_) => EVENT_ADDED,
            Self::EventsUpdated(_) => EVENTS_UPDATED,
            Self::SettingsUpdated(_) => SETTINGS_UPDATED,
        }
    }

    /// Broadcast notifications never expect a reply.
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            Self::EventAdded(_) | Self::EventsUpdated(_) | Self::SettingsUpdated(_)
        )
    }

    fn payload(&self) -> Result<Option<Value>> {
        let payload = match self {
            Self::ToggleOverlay { enabled } => Some(json!({ "enabled": enabled })),
            Self::UpdateSettings(patch) => Some(serde_json::to_value(patch)?),
            Self::EventAdded(event) => Some(serde_json::to_value(event)?),
            Self::EventsUpdated(events) => Some(json!({ "events": events })),
            Self::SettingsUpdated(settings) => Some(serde_json::to_value(settings)?),
            _ => None,
        };
        Ok(payload)
    }
}

#[derive(Debug, Default, Deserialize)]
struct TogglePayload {
    #[serde(default)]
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct EventsPayload {
    events: Vec<Event>,
}

/// A message plus optional tab addressing.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message: Message,
    /// Tab the request is about, when sent through the background coordinator
    pub tab_id: Option<TabId>,
}

/// Outcome of parsing a raw message.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Known(Envelope),
    /// Well-formed but of a type no context understands
    Unknown(String),
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            tab_id: None,
        }
    }

    pub fn for_tab(message: Message, tab_id: TabId) -> Self {
        Self {
            message,
            tab_id: Some(tab_id),
        }
    }

    /// Parses a raw message. Missing `type` or a bad payload is `MSG_001`.
    pub fn parse(value: &Value) -> Result<Parsed> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::malformed("message is not an object"))?;
        let message_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::malformed("message has no type"))?;
        let payload = obj.get("payload").cloned().unwrap_or(Value::Null);
        let tab_id = obj.get("tabId").and_then(Value::as_u64);

        let message = match message_type {
            GET_EVENTS => Message::GetEvents,
            CLEAR_EVENTS => Message::ClearEvents,
            TOGGLE_OVERLAY => {
                let toggle: TogglePayload = if payload.is_null() {
                    TogglePayload::default()
                } else {
                    decode(message_type, payload)?
                };
                Message::ToggleOverlay {
                    enabled: toggle.enabled,
                }
            }
            UPDATE_SETTINGS => Message::UpdateSettings(decode(message_type, payload)?),
            GET_SETTINGS => Message::GetSettings,
            GET_OVERLAY_STATE => Message::GetOverlayState,
            PING => Message::Ping,
            EVENT_ADDED => Message::EventAdded(decode(message_type, payload)?),
            EVENTS_UPDATED => {
                let body: EventsPayload = decode(message_type, payload)?;
                Message::EventsUpdated(body.events)
            }
            SETTINGS_UPDATED => Message::SettingsUpdated(decode(message_type, payload)?),
            other => return Ok(Parsed::Unknown(other.to_string())),
        };

        Ok(Parsed::Known(Envelope { message, tab_id }))
    }

    pub fn to_value(&self) -> Result<Value> {
        let mut obj = Map::new();
        obj.insert("type".into(), Value::from(self.message.message_type()));
        if let Some(payload) = self.message.payload()? {
            obj.insert("payload".into(), payload);
        }
        if let Some(tab_id) = self.tab_id {
            obj.insert("tabId".into(), Value::from(tab_id));
        }
        Ok(Value::Object(obj))
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        Self::new(message)
    }
}

fn decode<T: DeserializeOwned>(message_type: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| Error::malformed(format!("{} payload: {}", message_type, e)))
}

/// Reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            code: None,
        }
    }

    /// Success carrying a serialized body.
    pub fn with_data<T: Serialize>(data: &T) -> Result<Self> {
        Ok(Self {
            data: Some(serde_json::to_value(data)?),
            ..Self::ok()
        })
    }

    pub fn failure(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            code: err.error_code().map(str::to_string),
        }
    }

    /// Explicit answer for a message type nobody handles.
    pub fn unhandled(message_type: &str) -> Self {
        Self::failure(&Error::message(
            monitor_core::error::MessageErrorCode::Unhandled,
            format!("unhandled message type: {}", message_type),
        ))
    }

    pub fn pong() -> Self {
        Self {
            data: Some(json!({ "pong": true })),
            ..Self::ok()
        }
    }

    pub fn is_unhandled(&self) -> bool {
        self.code.as_deref() == Some("MSG_002")
    }

    /// Decodes `data` into a typed body.
    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.data
            .clone()
            .and_then(|d| serde_json::from_value(d).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: Value) -> Result<Parsed> {
        Envelope::parse(&value)
    }

    #[test]
    fn test_parse_request_types() {
        let parsed = parse(json!({"type": "PING"})).unwrap();
        assert_eq!(parsed, Parsed::Known(Envelope::new(Message::Ping)));

        let parsed = parse(json!({"type": "TOGGLE_OVERLAY", "tabId": 7})).unwrap();
        assert_eq!(
            parsed,
            Parsed::Known(Envelope::for_tab(Message::ToggleOverlay { enabled: None }, 7))
        );

        let parsed = parse(json!({"type": "UPDATE_SETTINGS", "payload": {"maxEvents": 3}})).unwrap();
        match parsed {
            Parsed::Known(Envelope {
                message: Message::UpdateSettings(patch),
                ..
            }) => assert_eq!(patch.max_events, Some(3)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_messages() {
        for raw in [json!("PING"), json!({}), json!({"type": 3})] {
            let err = parse(raw).unwrap_err();
            assert_eq!(err.error_code(), Some("MSG_001"));
        }
        let err = parse(json!({"type": "EVENTS_UPDATED", "payload": {"events": 1}})).unwrap_err();
        assert_eq!(err.error_code(), Some("MSG_001"));
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(
            parse(json!({"type": "SELF_DESTRUCT"})).unwrap(),
            Parsed::Unknown("SELF_DESTRUCT".into())
        );
    }

    #[test]
    fn test_wire_shape() {
        let event = Event::at(1, json!({"event": "gtm.js"}), "dataLayer");
        let value = Envelope::new(Message::EventsUpdated(vec![event.clone()]))
            .to_value()
            .unwrap();
        assert_eq!(value["type"], "EVENTS_UPDATED");
        assert_eq!(value["payload"]["events"][0]["id"], event.id.as_str());
        assert!(value.get("tabId").is_none());

        let parsed = Envelope::parse(&value).unwrap();
        assert_eq!(
            parsed,
            Parsed::Known(Envelope::new(Message::EventsUpdated(vec![event])))
        );
    }

    #[test]
    fn test_response_shapes() {
        let resp = Response::unhandled("FOO");
        assert!(!resp.success);
        assert!(resp.is_unhandled());

        let resp = Response::failure(&Error::handler("boom"));
        assert_eq!(resp.code.as_deref(), Some("MSG_003"));
        assert!(!resp.is_unhandled());

        let resp = Response::with_data(&vec![1, 2]).unwrap();
        assert_eq!(resp.data_as::<Vec<i32>>(), Some(vec![1, 2]));

        let value = serde_json::to_value(Response::ok()).unwrap();
        assert_eq!(value, json!({"success": true}));
    }
}
