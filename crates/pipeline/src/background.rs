//! Background coordinator: long-lived hub between page sessions and UI
//! surfaces.
//!
//! Tabs only ever notify the coordinator; they never wait on it. Surface
//! requests naming a tab are forwarded to that tab, with the coordinator's
//! event cache as a fallback when the tab does not answer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bridge::{
    ContextId, Envelope, Message, MessageBus, MessageHandler, MessageRouter, Response, TabId,
};
use monitor_core::error::StorageErrorCode;
use monitor_core::{Error, Event, Result, Settings, SettingsPatch};
use monitor_storage::{is_settings_key, SettingsStore, GLOBAL_SETTINGS_KEY};
use parking_lot::RwLock;
use telemetry::health;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct BackgroundCoordinator {
    bus: MessageBus,
    settings: SettingsStore,
    cache: RwLock<HashMap<TabId, Vec<Event>>>,
    cache_limit: usize,
}

/// Running coordinator tasks.
pub struct CoordinatorTask {
    pub coordinator: Arc<BackgroundCoordinator>,
    pub router: JoinHandle<()>,
    pub watcher: JoinHandle<()>,
}

impl BackgroundCoordinator {
    pub fn new(bus: MessageBus, settings: SettingsStore, cache_limit: usize) -> Self {
        Self {
            bus,
            settings,
            cache: RwLock::new(HashMap::new()),
            cache_limit: cache_limit.max(1),
        }
    }

    /// Events last reported by `tab`, newest first.
    pub fn cached_events(&self, tab: TabId) -> Vec<Event> {
        self.cache.read().get(&tab).cloned().unwrap_or_default()
    }

    pub fn tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self.cache.read().keys().copied().collect();
        tabs.sort_unstable();
        tabs
    }

    /// Drops the cache of a closed tab.
    pub fn forget_tab(&self, tab: TabId) {
        if self.cache.write().remove(&tab).is_some() {
            debug!(tab_id = tab, "Forgot tab");
        }
    }

    fn cache_event(&self, tab: TabId, event: Event) {
        let mut cache = self.cache.write();
        let events = cache.entry(tab).or_default();
        if events.iter().any(|e| e.id == event.id) {
            return;
        }
        events.insert(0, event);
        events.truncate(self.cache_limit);
    }

    fn replace_cache(&self, tab: TabId, mut events: Vec<Event>) {
        events.truncate(self.cache_limit);
        self.cache.write().insert(tab, events);
    }

    async fn forward(&self, tab: TabId, message: Message) -> Option<Response> {
        self.bus
            .request(&ContextId::Background, &ContextId::Tab(tab), &Envelope::new(message))
            .await
    }

    async fn handle_tab(&self, tab: TabId, envelope: Envelope) -> Result<Option<Response>> {
        let tab = envelope.tab_id.unwrap_or(tab);
        match envelope.message {
            Message::EventAdded(event) => {
                self.cache_event(tab, event.clone());
                let reached = self.bus.broadcast_to_surfaces(
                    &ContextId::Background,
                    &Envelope::for_tab(Message::EventAdded(event), tab),
                );
                debug!(tab_id = tab, surfaces = reached, "Relayed new event");
                Ok(Some(Response::ok()))
            }
            Message::EventsUpdated(events) => {
                self.replace_cache(tab, events.clone());
                self.bus.broadcast_to_surfaces(
                    &ContextId::Background,
                    &Envelope::for_tab(Message::EventsUpdated(events), tab),
                );
                Ok(Some(Response::ok()))
            }
            Message::Ping => Ok(Some(Response::pong())),
            _ => Ok(None),
        }
    }

    async fn handle_surface(&self, envelope: Envelope) -> Result<Option<Response>> {
        let Some(tab) = envelope.tab_id else {
            return match envelope.message {
                Message::Ping => Ok(Some(Response::pong())),
                Message::GetSettings => Response::with_data(&self.settings.load(None).await).map(Some),
                Message::UpdateSettings(patch) => self.update_global(&patch).await.map(Some),
                message if message.is_notification() => Ok(None),
                message => Err(Error::malformed(format!(
                    "{} requires a tabId",
                    message.message_type()
                ))),
            };
        };

        match envelope.message {
            Message::GetEvents => match self.forward(tab, Message::GetEvents).await {
                Some(resp) if resp.success => {
                    if let Some(events) = resp.data_as::<Vec<Event>>() {
                        self.replace_cache(tab, events);
                    }
                    Ok(Some(resp))
                }
                _ => Response::with_data(&self.cached_events(tab)).map(Some),
            },
            Message::ClearEvents => {
                self.replace_cache(tab, Vec::new());
                let resp = self.forward(tab, Message::ClearEvents).await;
                Ok(Some(resp.unwrap_or_else(Response::ok)))
            }
            Message::UpdateSettings(patch) => {
                match self.forward(tab, Message::UpdateSettings(patch.clone())).await {
                    Some(resp) => Ok(Some(resp)),
                    None => self.update_global(&patch).await.map(Some),
                }
            }
            Message::GetSettings => match self.forward(tab, Message::GetSettings).await {
                Some(resp) => Ok(Some(resp)),
                None => Response::with_data(&self.settings.load(None).await).map(Some),
            },
            message @ (Message::ToggleOverlay { .. } | Message::GetOverlayState) => {
                let resp = self.forward(tab, message).await;
                Ok(Some(resp.unwrap_or_else(Response::ok)))
            }
            Message::Ping => Ok(Some(Response::pong())),
            _ => Ok(None),
        }
    }

    /// Merges a patch into the global settings. Open tabs pick the change up
    /// from storage.
    async fn update_global(&self, patch: &SettingsPatch) -> Result<Response> {
        let next = self.settings.load(None).await.merged(patch)?;
        if !self.settings.save(&next).await {
            return Err(Error::storage(
                StorageErrorCode::WriteFailed,
                "settings could not be saved",
            ));
        }
        Response::with_data(&next)
    }

    async fn settings_for_key(&self, key: &str) -> Settings {
        if key == GLOBAL_SETTINGS_KEY {
            return self.settings.load(None).await;
        }
        let domain = key.strip_prefix("settings_");
        self.settings.load(domain).await
    }
}

#[async_trait]
impl MessageHandler for BackgroundCoordinator {
    async fn handle(&self, from: &ContextId, envelope: Envelope) -> Result<Option<Response>> {
        match from {
            ContextId::Tab(tab) => self.handle_tab(*tab, envelope).await,
            ContextId::Surface(_) => self.handle_surface(envelope).await,
            ContextId::Background => Ok(None),
        }
    }
}

/// Registers the coordinator on the bus and starts its settings watcher.
pub fn spawn_coordinator(coordinator: Arc<BackgroundCoordinator>) -> CoordinatorTask {
    let inbox = coordinator.bus.register(ContextId::Background);
    let serving = MessageRouter::new(ContextId::Background, coordinator.clone()).serve(inbox);
    let router = tokio::spawn(async move {
        if let Err(e) = serving.await {
            warn!(error = %e, "Background router task failed");
        }
        health().coordinator.set_unhealthy("coordinator stopped");
    });

    let watcher = {
        let coordinator = coordinator.clone();
        let mut changes = coordinator.settings.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) if is_settings_key(&change.key) => {
                        let settings = coordinator.settings_for_key(&change.key).await;
                        let reached = coordinator.bus.broadcast_to_surfaces(
                            &ContextId::Background,
                            &Envelope::new(Message::SettingsUpdated(settings)),
                        );
                        debug!(key = %change.key, surfaces = reached, "Broadcast settings change");
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Settings watcher lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    health().coordinator.set_healthy();
    info!("Background coordinator started");
    CoordinatorTask {
        coordinator,
        router,
        watcher,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge::{Inbox, Parsed};
    use monitor_storage::{KeyValueStorage, MemoryStorage, StorageArea};
    use serde_json::json;

    struct Setup {
        bus: MessageBus,
        storage: Arc<MemoryStorage>,
        task: CoordinatorTask,
    }

    fn setup() -> Setup {
        let bus = MessageBus::new();
        let storage = Arc::new(MemoryStorage::new(StorageArea::Sync));
        let settings = SettingsStore::new(storage.clone(), Settings::default());
        let coordinator = Arc::new(BackgroundCoordinator::new(bus.clone(), settings, 100));
        let task = spawn_coordinator(coordinator);
        Setup { bus, storage, task }
    }

    fn event(name: &str) -> Event {
        Event::at(1, json!({"event": name}), "dataLayer")
    }

    async fn next_message(inbox: &mut Inbox) -> Envelope {
        let delivery = inbox.recv().await.unwrap();
        match Envelope::parse(&delivery.message).unwrap() {
            Parsed::Known(envelope) => envelope,
            Parsed::Unknown(t) => panic!("unexpected message type {t}"),
        }
    }

    struct StubTab;

    #[async_trait]
    impl MessageHandler for StubTab {
        async fn handle(&self, _from: &ContextId, envelope: Envelope) -> Result<Option<Response>> {
            match envelope.message {
                Message::GetEvents => Response::with_data(&vec![event("from_tab")]).map(Some),
                Message::ToggleOverlay { .. } => {
                    Response::with_data(&json!({"enabled": false})).map(Some)
                }
                _ => Ok(None),
            }
        }
    }

    #[tokio::test]
    async fn test_new_events_are_cached_and_relayed() {
        let s = setup();
        let mut popup = s.bus.register(ContextId::surface("popup"));

        let added = Envelope::for_tab(Message::EventAdded(event("gtm.js")), 1);
        assert!(s.bus.notify(&ContextId::Tab(1), &ContextId::Background, &added));

        let relayed = next_message(&mut popup).await;
        assert_eq!(relayed.tab_id, Some(1));
        assert!(matches!(relayed.message, Message::EventAdded(e) if e.event_name == "gtm.js"));
        assert_eq!(s.task.coordinator.cached_events(1).len(), 1);
        assert_eq!(s.task.coordinator.tabs(), vec![1]);

        s.task.coordinator.forget_tab(1);
        assert!(s.task.coordinator.cached_events(1).is_empty());
    }

    #[tokio::test]
    async fn test_get_events_falls_back_to_cache() {
        let s = setup();
        let update = Envelope::for_tab(Message::EventsUpdated(vec![event("a"), event("b")]), 4);
        s.bus.notify(&ContextId::Tab(4), &ContextId::Background, &update);

        let resp = s
            .bus
            .request(
                &ContextId::surface("devtools"),
                &ContextId::Background,
                &Envelope::for_tab(Message::GetEvents, 4),
            )
            .await
            .unwrap();
        let events: Vec<Event> = resp.data_as().unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_requests_are_forwarded_to_live_tab() {
        let s = setup();
        let inbox = s.bus.register(ContextId::Tab(9));
        MessageRouter::new(ContextId::Tab(9), Arc::new(StubTab)).serve(inbox);
        let popup = ContextId::surface("popup");

        let resp = s
            .bus
            .request(&popup, &ContextId::Background, &Envelope::for_tab(Message::GetEvents, 9))
            .await
            .unwrap();
        let events: Vec<Event> = resp.data_as().unwrap();
        assert_eq!(events[0].event_name, "from_tab");
        assert_eq!(s.task.coordinator.cached_events(9).len(), 1);

        let resp = s
            .bus
            .request(
                &popup,
                &ContextId::Background,
                &Envelope::for_tab(Message::ToggleOverlay { enabled: None }, 9),
            )
            .await
            .unwrap();
        assert_eq!(resp.data, Some(json!({"enabled": false})));

        let resp = s
            .bus
            .request(&popup, &ContextId::Background, &Envelope::for_tab(Message::ClearEvents, 9))
            .await
            .unwrap();
        assert!(resp.is_unhandled());
        assert!(s.task.coordinator.cached_events(9).is_empty());
    }

    #[tokio::test]
    async fn test_tab_scoped_request_needs_tab_id() {
        let s = setup();
        let resp = s
            .bus
            .request(
                &ContextId::surface("popup"),
                &ContextId::Background,
                &Envelope::new(Message::GetEvents),
            )
            .await
            .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.code.as_deref(), Some("MSG_001"));
    }

    #[tokio::test]
    async fn test_global_settings_update_is_saved_and_broadcast() {
        let s = setup();
        let mut popup = s.bus.register(ContextId::surface("popup"));
        let patch = SettingsPatch {
            max_events: Some(10),
            ..Default::default()
        };

        let resp = s
            .bus
            .request(
                &ContextId::surface("popup"),
                &ContextId::Background,
                &Envelope::new(Message::UpdateSettings(patch)),
            )
            .await
            .unwrap();
        assert!(resp.success);
        let saved = s.storage.get(GLOBAL_SETTINGS_KEY).await.unwrap().unwrap();
        assert_eq!(saved["maxEvents"], 10);

        let broadcast = next_message(&mut popup).await;
        assert!(matches!(broadcast.message, Message::SettingsUpdated(ref settings) if settings.max_events == 10));

        let resp = s
            .bus
            .request(
                &ContextId::surface("popup"),
                &ContextId::Background,
                &Envelope::new(Message::UpdateSettings(SettingsPatch {
                    page_size: Some(0),
                    ..Default::default()
                })),
            )
            .await
            .unwrap();
        assert_eq!(resp.code.as_deref(), Some("CFG_001"));
    }
}
