//! Message router: the failure boundary of every context.

use std::sync::Arc;

use async_trait::async_trait;
use monitor_core::{Error, Result};
use serde_json::Value;
use telemetry::metrics;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::bus::{ContextId, Inbox};
use crate::messages::{Envelope, Parsed, Response};

/// Handles the messages of one context.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// `Ok(None)` declines the message; the router answers "unhandled".
    async fn handle(&self, from: &ContextId, envelope: Envelope) -> Result<Option<Response>>;
}

/// Parses raw messages, runs the handler and converts every failure into a
/// response. Nothing a handler does can take the context down.
#[derive(Clone)]
pub struct MessageRouter {
    context: ContextId,
    handler: Arc<dyn MessageHandler>,
}

impl MessageRouter {
    pub fn new(context: ContextId, handler: Arc<dyn MessageHandler>) -> Self {
        Self { context, handler }
    }

    pub fn context(&self) -> &ContextId {
        &self.context
    }

    /// Routes one raw message. `None` means no response is sent.
    pub async fn dispatch(&self, from: ContextId, raw: Value) -> Option<Response> {
        let envelope = match Envelope::parse(&raw) {
            Ok(Parsed::Known(envelope)) => envelope,
            Ok(Parsed::Unknown(message_type)) => {
                metrics().messages_unhandled.inc();
                debug!(context = %self.context, message_type = %message_type, "Unhandled message type");
                return Some(Response::unhandled(&message_type));
            }
            Err(e) => {
                metrics().messages_dropped.inc();
                debug!(context = %self.context, from = %from, error = %e, "Ignoring malformed message");
                return None;
            }
        };

        let message_type = envelope.message.message_type();
        let handler = self.handler.clone();
        // Run on its own task so a panic surfaces as a JoinError.
        let task = tokio::spawn(async move { handler.handle(&from, envelope).await });

        match task.await {
            Ok(Ok(Some(response))) => {
                metrics().messages_handled.inc();
                Some(response)
            }
            Ok(Ok(None)) => {
                metrics().messages_unhandled.inc();
                Some(Response::unhandled(message_type))
            }
            Ok(Err(e)) => {
                metrics().messages_failed.inc();
                warn!(context = %self.context, message_type, error = %e, "Message handler failed");
                Some(Response::failure(&e))
            }
            Err(join) => {
                metrics().messages_failed.inc();
                error!(context = %self.context, message_type, "Message handler panicked: {}", join);
                Some(Response::failure(&Error::handler(format!(
                    "{} handler panicked",
                    message_type
                ))))
            }
        }
    }

    /// Serves an inbox in arrival order until every sender is gone.
    pub fn serve(self, mut inbox: Inbox) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(delivery) = inbox.recv().await {
                let response = self.dispatch(delivery.from, delivery.message).await;
                if let (Some(reply), Some(response)) = (delivery.reply, response) {
                    // Caller may have stopped waiting.
                    let _ = reply.send(response);
                }
            }
            debug!(context = %self.context, "Inbox closed");
        })
    }
}
