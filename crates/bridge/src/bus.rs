//! In-process message bus connecting execution contexts.
//!
//! Every context registers an inbox. Delivery between two endpoints keeps
//! send order. Sending to a context that is not listening is not an error:
//! the caller simply gets no answer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::messages::{Envelope, Response};

/// Browser tab identifier.
pub type TabId = u64;

/// Addressable execution context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextId {
    /// Bridging context of one tab; hosts that tab's page session
    Tab(TabId),
    /// Long-lived coordinator
    Background,
    /// A UI surface such as the popup, side panel or devtools panel
    Surface(String),
}

impl ContextId {
    pub fn surface(name: impl Into<String>) -> Self {
        Self::Surface(name.into())
    }

    pub fn is_surface(&self) -> bool {
        matches!(self, Self::Surface(_))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tab(id) => write!(f, "tab:{}", id),
            Self::Background => f.write_str("background"),
            Self::Surface(name) => write!(f, "surface:{}", name),
        }
    }
}

/// A message waiting in a context's inbox.
#[derive(Debug)]
pub struct Delivery {
    pub from: ContextId,
    pub message: Value,
    /// Present for requests; dropped unanswered means "no response"
    pub reply: Option<oneshot::Sender<Response>>,
}

pub type Inbox = mpsc::UnboundedReceiver<Delivery>;

#[derive(Clone, Default)]
pub struct MessageBus {
    endpoints: Arc<RwLock<HashMap<ContextId, mpsc::UnboundedSender<Delivery>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a context, replacing any previous inbox for the same id.
    pub fn register(&self, id: ContextId) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(context = %id, "Context registered");
        self.endpoints.write().insert(id, tx);
        rx
    }

    pub fn unregister(&self, id: &ContextId) {
        if self.endpoints.write().remove(id).is_some() {
            debug!(context = %id, "Context unregistered");
        }
    }

    pub fn is_listening(&self, id: &ContextId) -> bool {
        self.endpoints
            .read()
            .get(id)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Currently registered UI surfaces.
    pub fn surfaces(&self) -> Vec<ContextId> {
        self.endpoints
            .read()
            .keys()
            .filter(|id| id.is_surface())
            .cloned()
            .collect()
    }

    /// Sends a request and waits for the reply.
    ///
    /// `None` when the target is not listening or declined to answer.
    pub async fn send(&self, from: &ContextId, target: &ContextId, message: Value) -> Option<Response> {
        let (reply, rx) = oneshot::channel();
        if !self.deliver(target, Delivery {
            from: from.clone(),
            message,
            reply: Some(reply),
        }) {
            return None;
        }
        rx.await.ok()
    }

    /// Typed `send`.
    pub async fn request(
        &self,
        from: &ContextId,
        target: &ContextId,
        envelope: &Envelope,
    ) -> Option<Response> {
        let value = envelope.to_value().ok()?;
        self.send(from, target, value).await
    }

    /// Fire-and-forget delivery. Returns whether a listener received it.
    pub fn notify(&self, from: &ContextId, target: &ContextId, envelope: &Envelope) -> bool {
        let Ok(message) = envelope.to_value() else {
            return false;
        };
        self.deliver(target, Delivery {
            from: from.clone(),
            message,
            reply: None,
        })
    }

    /// Sends a notification to every open surface except the sender.
    pub fn broadcast_to_surfaces(&self, from: &ContextId, envelope: &Envelope) -> usize {
        self.surfaces()
            .iter()
            .filter(|id| *id != from)
            .filter(|id| self.notify(from, id, envelope))
            .count()
    }

    fn deliver(&self, target: &ContextId, delivery: Delivery) -> bool {
        let sender = self.endpoints.read().get(target).cloned();
        let Some(sender) = sender else {
            debug!(target = %target, "No listener for message");
            return false;
        };
        if sender.send(delivery).is_err() {
            debug!(target = %target, "Listener went away");
            self.endpoints.write().remove(target);
            return false;
        }
        true
    }
}
