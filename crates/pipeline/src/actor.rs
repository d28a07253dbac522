//! Runs a [`PageSession`] as a task and exposes it on the message bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge::{
    accept_window_message, ContextId, Envelope, MessageHandler, MessageRouter, Response, TabId,
    WindowMessage,
};
use monitor_core::{CapturedPush, Error, Result};
use monitor_storage::is_settings_key;
use overlay::RenderSink;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::session::{PageSession, SessionSnapshot, UserAction};

/// Upper bound on how long the loop sleeps with no timer pending.
const IDLE_WAKEUP: Duration = Duration::from_secs(3600);

/// Input to a running session.
pub enum SessionCommand {
    Capture(CapturedPush),
    Action(UserAction),
    Message {
        from: ContextId,
        envelope: Envelope,
        reply: oneshot::Sender<Result<Option<Response>>>,
    },
    Inspect(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tab_id: TabId,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Feeds a captured push directly, bypassing the page window.
    pub fn capture(&self, push: CapturedPush) -> bool {
        self.tx.send(SessionCommand::Capture(push)).is_ok()
    }

    pub fn act(&self, action: UserAction) -> bool {
        self.tx.send(SessionCommand::Action(action)).is_ok()
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Inspect(tx)).ok()?;
        rx.await.ok()
    }

    /// Tears the session down and waits until pending work is flushed.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(SessionCommand::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

#[async_trait]
impl MessageHandler for SessionHandle {
    async fn handle(&self, from: &ContextId, envelope: Envelope) -> Result<Option<Response>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Message {
                from: from.clone(),
                envelope,
                reply,
            })
            .map_err(|_| Error::handler("page session is closed"))?;
        rx.await
            .map_err(|_| Error::handler("page session dropped the request"))?
    }
}

/// A spawned session: its handle and the task driving it.
pub struct SessionTask {
    pub handle: SessionHandle,
    pub join: JoinHandle<()>,
}

/// Page window the session listens on for captured pushes.
pub struct WindowFeed {
    pub origin: String,
    pub messages: mpsc::UnboundedReceiver<WindowMessage>,
}

/// Spawns the session actor and registers the tab on the message bus.
pub fn spawn_session<S>(session: PageSession<S>, window: Option<WindowFeed>) -> SessionTask
where
    S: RenderSink + 'static,
{
    let tab_id = session.tab_id();
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SessionHandle { tab_id, tx };

    let context = ContextId::Tab(tab_id);
    let bus = session.services().bus.clone();
    let inbox = bus.register(context.clone());
    MessageRouter::new(context, Arc::new(handle.clone())).serve(inbox);

    let settings_rx = session.services().settings.subscribe();
    let join = tokio::spawn(run(session, rx, window, settings_rx));
    info!(tab_id, "Page session started");
    SessionTask { handle, join }
}

async fn run<S: RenderSink>(
    mut session: PageSession<S>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    window: Option<WindowFeed>,
    mut settings_rx: broadcast::Receiver<monitor_storage::StorageChange>,
) {
    let (origin, mut window_rx) = match window {
        Some(feed) => (feed.origin, Some(feed.messages)),
        None => (String::new(), None),
    };
    let mut window_open = window_rx.is_some();
    let mut settings_open = true;

    loop {
        let deadline = session.next_deadline();
        let wake_at = deadline.unwrap_or_else(|| Instant::now() + IDLE_WAKEUP);

        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                let now = Instant::now();
                match command {
                    SessionCommand::Capture(push) => {
                        session.on_capture(push, now);
                    }
                    SessionCommand::Action(action) => session.handle_action(action, now).await,
                    SessionCommand::Message { from, envelope, reply } => {
                        let result = session.handle_message(&from, envelope, now).await;
                        let _ = reply.send(result);
                    }
                    SessionCommand::Inspect(reply) => {
                        let _ = reply.send(session.snapshot());
                    }
                    SessionCommand::Shutdown(done) => {
                        session.teardown().await;
                        let _ = done.send(());
                        return;
                    }
                }
            }
            message = next_window_message(&mut window_rx), if window_open => match message {
                Some(message) => {
                    if let Some(push) = accept_window_message(&origin, &message) {
                        session.on_capture(push, Instant::now());
                    }
                }
                None => {
                    debug!(tab_id = session.tab_id(), "Page window closed");
                    window_open = false;
                }
            },
            change = settings_rx.recv(), if settings_open => match change {
                Ok(change) if is_settings_key(&change.key) => {
                    session.reload_settings(Instant::now()).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(tab_id = session.tab_id(), skipped, "Missed storage changes, reloading settings");
                    session.reload_settings(Instant::now()).await;
                }
                Err(RecvError::Closed) => settings_open = false,
            },
            _ = sleep_until(wake_at), if deadline.is_some() => {
                session.on_timer(Instant::now()).await;
            }
        }
    }

    session.teardown().await;
}

async fn next_window_message(
    window: &mut Option<mpsc::UnboundedReceiver<WindowMessage>>,
) -> Option<WindowMessage> {
    match window {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
