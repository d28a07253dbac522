//! Common test setup functions.

use std::sync::Arc;
use std::time::Duration;

use bridge::{
    page_window, ContextId, Envelope, Inbox, Message, MessageBus, PageCapture, Parsed, Response,
    TabId,
};
use monitor_core::Settings;
use monitor_storage::{PersistenceStore, SettingsStore, StorageArea};
use overlay::DomList;
use parking_lot::Mutex;
use pipeline::{
    spawn_coordinator, spawn_session, BackgroundCoordinator, CoordinatorTask, PageSession,
    SessionConfig, SessionHandle, SessionServices, SessionSnapshot, WindowFeed,
};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::fixtures::{ORIGIN, PAGE_URL};
use crate::mocks::{MockClipboard, MockStorage};

/// How long helpers wait for asynchronous effects.
const WAIT: Duration = Duration::from_secs(2);

/// Name of the UI surface every context registers.
pub const POPUP: &str = "popup";

/// Test context with a bus, a background coordinator and mock storage.
///
/// Runs the production code paths end to end:
/// - Real page sessions driven through the page-world capture bridge
/// - Real coordinator and message routers on one bus
/// - MockStorage in both storage areas so tests can inspect and break it
pub struct TestContext {
    pub bus: MessageBus,
    pub local: MockStorage,
    pub sync: MockStorage,
    pub clipboard: MockClipboard,
    pub services: SessionServices,
    pub coordinator: CoordinatorTask,
    pub popup: Inbox,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_settings(Settings::default()).await
    }

    /// Context whose settings default to `defaults`.
    pub async fn with_settings(defaults: Settings) -> Self {
        let bus = MessageBus::new();
        let local = MockStorage::new(StorageArea::Local);
        let sync = MockStorage::new(StorageArea::Sync);
        let clipboard = MockClipboard::new();

        let settings = SettingsStore::new(Arc::new(sync.clone()), defaults);
        let services = SessionServices {
            bus: bus.clone(),
            persistence: PersistenceStore::new(Arc::new(local.clone())),
            settings: settings.clone(),
            clipboard: Arc::new(clipboard.clone()),
        };

        let coordinator = spawn_coordinator(Arc::new(BackgroundCoordinator::new(
            bus.clone(),
            settings,
            500,
        )));
        let popup = bus.register(ContextId::surface(POPUP));

        Self {
            bus,
            local,
            sync,
            clipboard,
            services,
            coordinator,
            popup,
        }
    }

    /// Opens a tab on the default page.
    pub async fn open_tab(&self, tab_id: TabId) -> TestTab {
        self.open_tab_at(tab_id, PAGE_URL).await
    }

    /// Opens a tab, installs the capture script and starts its session.
    pub async fn open_tab_at(&self, tab_id: TabId, url: &str) -> TestTab {
        let (window, messages) = page_window(ORIGIN);
        let sink = Arc::new(Mutex::new(DomList::new()));
        let session = PageSession::initialize(
            SessionConfig {
                tab_id,
                page_url: url.to_string(),
            },
            self.services.clone(),
            sink.clone(),
        )
        .await;
        let data_layers = session.settings().data_layer_names.clone();
        let tracked = session.tracked_arrays();
        let task = spawn_session(
            session,
            Some(WindowFeed {
                origin: ORIGIN.to_string(),
                messages,
            }),
        );

        let mut page = PageCapture::new(window);
        page.install(&data_layers);
        TestTab {
            tab_id,
            handle: task.handle,
            join: task.join,
            page,
            tracked,
            sink,
        }
    }

    /// Sends a request from the popup surface to the background.
    pub async fn request(&self, message: Message, tab_id: Option<TabId>) -> Response {
        let envelope = Envelope {
            message,
            tab_id,
        };
        self.bus
            .request(&ContextId::surface(POPUP), &ContextId::Background, &envelope)
            .await
            .expect("background did not answer")
    }

    /// Sends a raw JSON message from the popup surface to the background.
    pub async fn send_raw(&self, message: Value) -> Option<Response> {
        self.bus
            .send(&ContextId::surface(POPUP), &ContextId::Background, message)
            .await
    }

    /// Waits for the next notification delivered to the popup.
    pub async fn next_popup_message(&mut self) -> Envelope {
        let delivery = tokio::time::timeout(WAIT, self.popup.recv())
            .await
            .expect("no popup notification")
            .expect("popup inbox closed");
        match Envelope::parse(&delivery.message).expect("malformed notification") {
            Parsed::Known(envelope) => envelope,
            Parsed::Unknown(t) => panic!("unexpected notification {t}"),
        }
    }

    /// Waits for a popup notification matching `pred`, skipping others.
    pub async fn wait_for_popup<F>(&mut self, pred: F) -> Envelope
    where
        F: Fn(&Envelope) -> bool,
    {
        loop {
            let envelope = self.next_popup_message().await;
            if pred(&envelope) {
                return envelope;
            }
        }
    }

    /// Breaks or restores both storage areas.
    pub fn set_storage_failure(&self, should_fail: bool) {
        self.local.set_should_fail(should_fail);
        self.sync.set_should_fail(should_fail);
    }
}

/// A page with the capture script installed and a running session.
pub struct TestTab {
    pub tab_id: TabId,
    pub handle: SessionHandle,
    pub join: JoinHandle<()>,
    pub page: PageCapture,
    tracked: watch::Receiver<Vec<String>>,
    pub sink: Arc<Mutex<DomList>>,
}

impl TestTab {
    /// `window.dataLayer.push(data)` from page script.
    pub fn push(&mut self, data: Value) {
        self.push_to("dataLayer", data);
    }

    /// `window[name].push(data)`, re-hooking arrays if the session's
    /// `dataLayerNames` changed since the last push.
    pub fn push_to(&mut self, name: &str, data: Value) {
        if self.tracked.has_changed().unwrap_or(false) {
            let names = self.tracked.borrow_and_update().clone();
            self.page.retarget(&names);
        }
        self.page.push(name, data);
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.handle.snapshot().await.expect("session is gone")
    }

    /// Polls until the session holds at least `count` events.
    pub async fn wait_for_events(&self, count: usize) -> SessionSnapshot {
        self.wait_until(|s| s.events.len() >= count).await
    }

    /// Polls the session until `pred` holds.
    pub async fn wait_until<F>(&self, pred: F) -> SessionSnapshot
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let snapshot = self.snapshot().await;
            if pred(&snapshot) {
                return snapshot;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("session never reached the expected state: {snapshot:?}");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Tears the session down and waits for the task to finish.
    pub async fn close(self) {
        self.handle.shutdown().await;
        let _ = self.join.await;
    }
}
