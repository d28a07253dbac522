//! Page-world capture and the same-window channel to the bridging context.
//!
//! The capture side hooks the tracked arrays, replays entries that were
//! pushed before it was installed, and posts every push to the window. The
//! bridging side only trusts messages posted by the window itself.

use std::collections::HashMap;

use chrono::Utc;
use monitor_core::CapturedPush;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Envelope type used for capture messages on the window channel.
pub const PAGE_PUSH_TYPE: &str = "DATALAYER_MONITOR_PUSH";

/// Who posted a window message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowSource {
    /// The window posted to itself
    SameWindow,
    /// Another frame or window
    Foreign,
}

#[derive(Debug, Clone)]
pub struct WindowMessage {
    pub source: WindowSource,
    pub origin: String,
    pub data: Value,
}

/// `postMessage`-style channel of one window.
#[derive(Clone)]
pub struct PageWindow {
    origin: String,
    tx: mpsc::UnboundedSender<WindowMessage>,
}

/// Creates a window channel for `origin`.
pub fn page_window(origin: impl Into<String>) -> (PageWindow, mpsc::UnboundedReceiver<WindowMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        PageWindow {
            origin: origin.into(),
            tx,
        },
        rx,
    )
}

impl PageWindow {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// `window.postMessage(data, origin)` from script running in this window.
    pub fn post_message(&self, data: Value) -> bool {
        self.deliver(WindowMessage {
            source: WindowSource::SameWindow,
            origin: self.origin.clone(),
            data,
        })
    }

    /// Delivers an arbitrary message, e.g. one posted by another frame.
    pub fn deliver(&self, message: WindowMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Accepts a window message on the bridging side.
///
/// Returns the captured push only for same-window messages from the
/// window's own origin carrying a well-formed capture envelope.
pub fn accept_window_message(window_origin: &str, message: &WindowMessage) -> Option<CapturedPush> {
    if message.source != WindowSource::SameWindow || message.origin != window_origin {
        debug!(origin = %message.origin, "Rejecting foreign window message");
        return None;
    }
    if message.data.get("type").and_then(Value::as_str) != Some(PAGE_PUSH_TYPE) {
        return None;
    }
    let payload = message.data.get("payload")?.clone();
    match serde_json::from_value(payload) {
        Ok(push) => Some(push),
        Err(e) => {
            debug!(error = %e, "Ignoring malformed capture message");
            None
        }
    }
}

#[derive(Debug, Default)]
struct TrackedArray {
    entries: Vec<Value>,
    hooked: bool,
    /// Entries already forwarded to the window
    posted: usize,
}

/// Page-world capture script.
pub struct PageCapture {
    window: PageWindow,
    arrays: HashMap<String, TrackedArray>,
}

impl PageCapture {
    pub fn new(window: PageWindow) -> Self {
        Self {
            window,
            arrays: HashMap::new(),
        }
    }

    /// Hooks the named arrays, creating missing ones. Entries not yet
    /// forwarded are replayed in order. Returns the number of replayed entries.
    pub fn install(&mut self, names: &[String]) -> usize {
        let mut replayed = 0;
        for name in names {
            let array = self.arrays.entry(name.clone()).or_default();
            if array.hooked {
                continue;
            }
            array.hooked = true;
            let start = array.posted;
            let pending = array.entries[start..].to_vec();
            array.posted = array.entries.len();
            for (offset, data) in pending.into_iter().enumerate() {
                self.post(name, start + offset, data);
                replayed += 1;
            }
            debug!(data_layer = %name, "Hooked tracked array");
        }
        replayed
    }

    /// Switches the hooked set to exactly `names`. Arrays no longer named are
    /// released; newly named ones are hooked and replayed.
    pub fn retarget(&mut self, names: &[String]) -> usize {
        for (name, array) in self.arrays.iter_mut() {
            if array.hooked && !names.contains(name) {
                array.hooked = false;
                debug!(data_layer = %name, "Released tracked array");
            }
        }
        self.install(names)
    }

    /// Restores the original push behavior of every array.
    pub fn uninstall(&mut self) {
        for array in self.arrays.values_mut() {
            array.hooked = false;
        }
    }

    /// `window[name].push(data)` as seen by page script.
    pub fn push(&mut self, name: &str, data: Value) {
        let array = self.arrays.entry(name.to_string()).or_default();
        array.entries.push(data.clone());
        if array.hooked {
            let index = array.entries.len() - 1;
            array.posted = array.entries.len();
            self.post(name, index, data);
        }
    }

    pub fn entries(&self, name: &str) -> Option<&[Value]> {
        self.arrays.get(name).map(|a| a.entries.as_slice())
    }

    pub fn is_hooked(&self, name: &str) -> bool {
        self.arrays.get(name).map(|a| a.hooked).unwrap_or(false)
    }

    fn post(&self, name: &str, index: usize, data: Value) {
        let push = CapturedPush {
            data,
            source: name.to_string(),
            data_layer_index: Some(index),
            timestamp: Some(Utc::now().timestamp_millis()),
        };
        let Ok(payload) = serde_json::to_value(&push) else {
            return;
        };
        trace!(data_layer = %name, index, "Posting captured push");
        self.window
            .post_message(json!({ "type": PAGE_PUSH_TYPE, "payload": payload }));
    }
}
