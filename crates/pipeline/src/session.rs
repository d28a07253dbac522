//! Page session: the orchestrator of one tracked page.

use std::sync::Arc;
use std::time::Duration;

use bridge::{ContextId, Envelope, Message, MessageBus, Response, TabId};
use monitor_core::limits::{MINIMIZE_AFTER_COLLAPSE_MS, PERSIST_DEBOUNCE_MS};
use monitor_core::{
    domain_from_url, CapturedPush, Event, EventBuffer, EventGroup, FilterConfig, FilterEngine,
    FilterMode, GroupingEngine, GroupingMode, Result, Settings, SettingsChanges, SettingsPatch,
};
use monitor_storage::{PersistenceStore, SettingsStore};
use overlay::{OverlayRenderer, OverlayState, RenderInput, RenderOutcome, RenderSink, ScheduleDecision, Viewport};
use serde::Serialize;
use serde_json::json;
use telemetry::metrics;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::clipboard::Clipboard;

/// Collaborators shared by every session of a host.
#[derive(Clone)]
pub struct SessionServices {
    pub bus: MessageBus,
    pub persistence: PersistenceStore,
    pub settings: SettingsStore,
    pub clipboard: Arc<dyn Clipboard>,
}

/// Identity of the tracked page.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tab_id: TabId,
    pub page_url: String,
}

/// Something the developer did in the overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    ClearEvents,
    SetSearchText(String),
    AddFilter(String),
    RemoveFilter(String),
    SetFilterMode(FilterMode),
    ClearFilters,
    SetGroupingEnabled(bool),
    SetGroupingMode(GroupingMode),
    ToggleGroupCollapsed(String),
    SetAllCollapsed(bool),
    SetPersistence(bool),
    NextPage,
    PrevPage,
    Drag { dx: f64, dy: f64 },
    Resize { dw: f64, dh: f64 },
    SetViewport(Viewport),
    SetMinimized(bool),
    Close,
    CopyEvent(String),
    OpenFilterModal,
    CloseFilterModal,
    SetFilterDraft(String),
    SubmitFilterModal,
}

/// Read-only view of a session, for hosts and tests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub tab_id: TabId,
    pub domain: String,
    pub events: Vec<Event>,
    pub groups: Vec<EventGroup>,
    pub settings: Settings,
    pub filter: FilterConfig,
    pub overlay: OverlayState,
    pub notice: Option<String>,
}

pub struct PageSession<S> {
    tab_id: TabId,
    context: ContextId,
    domain: String,
    settings: Settings,
    buffer: EventBuffer,
    filter: FilterEngine,
    grouping: GroupingEngine,
    renderer: OverlayRenderer<S>,
    services: SessionServices,
    persist_due: Option<Instant>,
    minimize_due: Option<Instant>,
    tracked: watch::Sender<Vec<String>>,
    closed: bool,
}

impl<S: RenderSink> PageSession<S> {
    /// Loads settings and, when enabled, the persisted events of the page's
    /// domain, then paints the overlay once.
    pub async fn initialize(config: SessionConfig, services: SessionServices, sink: S) -> Self {
        let domain = domain_from_url(&config.page_url);
        let settings = services.settings.load(Some(&domain)).await;
        let (tracked, _) = watch::channel(settings.data_layer_names.clone());

        let mut session = Self {
            tab_id: config.tab_id,
            context: ContextId::Tab(config.tab_id),
            buffer: EventBuffer::new(settings.max_events),
            filter: FilterEngine::new(settings.filter_config()),
            grouping: GroupingEngine::new(settings.grouping()),
            renderer: OverlayRenderer::new(sink, &settings),
            domain,
            settings,
            services,
            persist_due: None,
            minimize_due: None,
            tracked,
            closed: false,
        };

        let mut restored = 0;
        if session.settings.persist_events {
            let events = session
                .services
                .persistence
                .load(&session.domain, session.settings.persist_max_age_ms)
                .await;
            restored = events.len();
            if restored > 0 {
                session.buffer.set_all(events);
                session.regroup();
                session.notify_background(Message::EventsUpdated(session.buffer.events()));
            }
        }

        metrics().active_sessions.inc();
        info!(
            tab_id = session.tab_id,
            domain = %session.domain,
            restored,
            "Page session initialized"
        );
        session.request_render(Instant::now());
        session
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Names of the arrays the page capture should hook. The capture side
    /// re-installs itself when this changes.
    pub fn tracked_arrays(&self) -> watch::Receiver<Vec<String>> {
        self.tracked.subscribe()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn events(&self) -> Vec<Event> {
        self.buffer.events()
    }

    pub fn groups(&self) -> Vec<EventGroup> {
        self.grouping.groups()
    }

    pub fn services(&self) -> &SessionServices {
        &self.services
    }

    pub fn renderer(&self) -> &OverlayRenderer<S> {
        &self.renderer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            tab_id: self.tab_id,
            domain: self.domain.clone(),
            events: self.buffer.events(),
            groups: self.grouping.groups(),
            settings: self.settings.clone(),
            filter: self.filter.config().clone(),
            overlay: self.renderer.state(),
            notice: self.renderer.notice().map(str::to_string),
        }
    }

    /// Capture path: a push observed by the page-world script.
    pub fn on_capture(&mut self, push: CapturedPush, now: Instant) -> bool {
        self.add_event(push.into_event(), now)
    }

    /// Adds one event. Duplicate ids are ignored.
    pub fn add_event(&mut self, mut event: Event, now: Instant) -> bool {
        if self.closed {
            return false;
        }
        if self.buffer.contains(&event.id) {
            metrics().events_duplicate.inc();
            debug!(event_id = %event.id, "Duplicate event ignored");
            return false;
        }

        let at_capacity = self.buffer.len() >= self.buffer.max_events();
        self.grouping.add_event_to_group(&mut event);
        self.buffer.add(event.clone());
        metrics().events_captured.inc();
        if at_capacity {
            metrics().events_evicted.inc();
            self.prune_groups();
            if event.group_id.is_some() {
                event.group_id = self.grouping.group_id_of(&event.id);
            }
        }

        trace!(event_id = %event.id, event_name = %event.event_name, "Captured event");
        self.notify_background(Message::EventAdded(event));
        self.schedule_persist(now);
        self.request_render(now);
        true
    }

    /// Replaces the buffer with an authoritative list from elsewhere.
    pub fn replace_events(&mut self, events: Vec<Event>, now: Instant) {
        self.buffer.set_all(events);
        self.regroup();
        self.schedule_persist(now);
        self.request_render(now);
    }

    pub async fn clear_events(&mut self, now: Instant) {
        self.buffer.clear();
        self.grouping.clear_groups();
        self.persist_due = None;
        self.minimize_due = None;
        self.services.persistence.clear(&self.domain).await;
        self.renderer.first_page();
        self.notify_background(Message::EventsUpdated(Vec::new()));
        self.request_render(now);
        info!(tab_id = self.tab_id, "Events cleared");
    }

    pub async fn handle_action(&mut self, action: UserAction, now: Instant) {
        if self.closed {
            return;
        }
        match action {
            UserAction::ClearEvents => self.clear_events(now).await,
            UserAction::SetSearchText(text) => {
                if self.filter.set_search_text(&text) {
                    self.renderer.first_page();
                }
            }
            UserAction::AddFilter(pattern) => {
                if self.filter.add_filter(&pattern) {
                    self.save_filters(now).await;
                }
            }
            UserAction::RemoveFilter(pattern) => {
                if self.filter.remove_filter(&pattern) {
                    self.save_filters(now).await;
                }
            }
            UserAction::SetFilterMode(mode) => {
                if self.filter.set_filter_mode(mode) {
                    self.save_filters(now).await;
                }
            }
            UserAction::ClearFilters => {
                self.filter.clear_filters();
                self.save_filters(now).await;
            }
            UserAction::SetGroupingEnabled(enabled) => {
                self.patch_quietly(
                    SettingsPatch {
                        grouping_enabled: Some(enabled),
                        ..Default::default()
                    },
                    now,
                )
                .await
            }
            UserAction::SetGroupingMode(mode) => {
                self.patch_quietly(
                    SettingsPatch {
                        grouping_mode: Some(mode),
                        ..Default::default()
                    },
                    now,
                )
                .await
            }
            UserAction::ToggleGroupCollapsed(group_id) => {
                self.grouping.toggle_collapsed(&group_id);
                self.check_minimize(now);
            }
            UserAction::SetAllCollapsed(collapsed) => {
                self.grouping.set_all_collapsed(collapsed);
                self.check_minimize(now);
            }
            UserAction::SetPersistence(enabled) => {
                self.patch_quietly(
                    SettingsPatch {
                        persist_events: Some(enabled),
                        ..Default::default()
                    },
                    now,
                )
                .await
            }
            UserAction::NextPage => {
                self.renderer.next_page();
            }
            UserAction::PrevPage => {
                self.renderer.prev_page();
            }
            UserAction::Drag { dx, dy } => {
                let position = self.renderer.drag_by(dx, dy);
                self.patch_quietly(
                    SettingsPatch {
                        overlay_position: Some(position),
                        ..Default::default()
                    },
                    now,
                )
                .await
            }
            UserAction::Resize { dw, dh } => {
                let size = self.renderer.resize_by(dw, dh);
                self.patch_quietly(
                    SettingsPatch {
                        overlay_size: Some(size),
                        ..Default::default()
                    },
                    now,
                )
                .await
            }
            UserAction::SetViewport(viewport) => self.renderer.set_viewport(viewport),
            UserAction::SetMinimized(minimized) => {
                self.patch_quietly(
                    SettingsPatch {
                        overlay_minimized: Some(minimized),
                        ..Default::default()
                    },
                    now,
                )
                .await
            }
            UserAction::Close => {
                self.patch_quietly(
                    SettingsPatch {
                        overlay_enabled: Some(false),
                        ..Default::default()
                    },
                    now,
                )
                .await
            }
            UserAction::CopyEvent(event_id) => {
                self.copy_event(&event_id, now).await;
            }
            UserAction::OpenFilterModal => self.renderer.modal_mut().open(),
            UserAction::CloseFilterModal => self.renderer.modal_mut().close(),
            UserAction::SetFilterDraft(text) => self.renderer.modal_mut().set_draft(&text),
            UserAction::SubmitFilterModal => {
                if let Some(pattern) = self.renderer.modal_mut().submit() {
                    if self.filter.add_filter(&pattern) {
                        self.save_filters(now).await;
                    }
                }
            }
        }
        self.request_render(now);
    }

    /// Handles a request addressed to this tab.
    pub async fn handle_message(
        &mut self,
        from: &ContextId,
        envelope: Envelope,
        now: Instant,
    ) -> Result<Option<Response>> {
        trace!(from = %from, message_type = envelope.message.message_type(), "Session message");
        match envelope.message {
            Message::GetEvents => Response::with_data(&self.buffer.events()).map(Some),
            Message::ClearEvents => {
                self.clear_events(now).await;
                Ok(Some(Response::ok()))
            }
            Message::ToggleOverlay { enabled } => {
                let enabled = enabled.unwrap_or(!self.settings.overlay_enabled);
                self.update_settings(
                    SettingsPatch {
                        overlay_enabled: Some(enabled),
                        ..Default::default()
                    },
                    now,
                )
                .await?;
                Response::with_data(&json!({ "enabled": enabled })).map(Some)
            }
            Message::UpdateSettings(patch) => {
                let settings = self.update_settings(patch, now).await?;
                Response::with_data(&settings).map(Some)
            }
            Message::GetSettings => Response::with_data(&self.settings).map(Some),
            Message::GetOverlayState => Response::with_data(&self.renderer.state()).map(Some),
            Message::Ping => Ok(Some(Response::pong())),
            Message::EventsUpdated(events) => {
                self.replace_events(events, now);
                Ok(Some(Response::ok()))
            }
            Message::SettingsUpdated(settings) => {
                let settings = settings.validated()?;
                self.apply_settings(settings, now).await;
                Ok(Some(Response::ok()))
            }
            Message::EventAdded(_) => Ok(None),
        }
    }

    /// Merges a patch, applies it and records the patch in settings storage.
    ///
    /// An invalid patch leaves the settings untouched.
    pub async fn update_settings(&mut self, patch: SettingsPatch, now: Instant) -> Result<Settings> {
        let next = self.settings.merged(&patch)?;
        self.apply_settings(next, now).await;
        self.services.settings.save_patch(&self.domain, &patch).await;
        Ok(self.settings.clone())
    }

    /// Re-reads the effective settings after a storage change.
    pub async fn reload_settings(&mut self, now: Instant) {
        let next = self.services.settings.load(Some(&self.domain)).await;
        self.apply_settings(next, now).await;
    }

    /// Pushes an immutable settings value into every component it touches.
    pub async fn apply_settings(&mut self, next: Settings, now: Instant) -> SettingsChanges {
        let changes = self.settings.changes(&next);
        let debug_changed = self.settings.debug_logging != next.debug_logging;
        self.settings = next;
        if debug_changed {
            info!(tab_id = self.tab_id, debug = self.settings.debug_logging, "Debug logging toggled");
        }
        if !changes.any() {
            return changes;
        }

        if changes.max_events && self.buffer.set_max_events(self.settings.max_events) {
            self.prune_groups();
        }
        if changes.grouping {
            self.grouping.update_settings(self.settings.grouping());
            self.regroup();
        }
        if changes.filters {
            self.filter
                .apply(self.settings.event_filters.clone(), self.settings.filter_mode);
        }
        if changes.persistence {
            if self.settings.persist_events {
                self.schedule_persist(now);
            } else {
                self.persist_due = None;
                self.services.persistence.clear(&self.domain).await;
            }
        }
        if changes.overlay {
            self.renderer.apply_settings(&self.settings);
        }
        if changes.capture {
            info!(
                tab_id = self.tab_id,
                data_layers = ?self.settings.data_layer_names,
                "Tracked arrays changed"
            );
            self.tracked.send_replace(self.settings.data_layer_names.clone());
        }

        debug!(tab_id = self.tab_id, ?changes, "Settings applied");
        self.renderer.invalidate();
        self.request_render(now);
        changes
    }

    /// Earliest timer the actor has to wake up for.
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.renderer.next_deadline(), self.persist_due, self.minimize_due]
            .into_iter()
            .flatten()
            .min()
    }

    /// Runs whatever timers are due at `now`.
    pub async fn on_timer(&mut self, now: Instant) {
        if self.renderer.expire(now) {
            self.request_render(now);
        }
        self.render_if_due(now);

        if self.persist_due.is_some_and(|at| at <= now) {
            self.flush_persistence().await;
        }

        if self.minimize_due.is_some_and(|at| at <= now) {
            self.minimize_due = None;
            if self.grouping.all_collapsed() && !self.renderer.is_minimized() {
                self.patch_quietly(
                    SettingsPatch {
                        overlay_minimized: Some(true),
                        ..Default::default()
                    },
                    now,
                )
                .await;
            }
        }
    }

    /// Writes a pending snapshot now.
    pub async fn flush_persistence(&mut self) -> bool {
        if self.persist_due.take().is_none() || !self.settings.persist_events {
            return false;
        }
        let events = self.buffer.events();
        self.services
            .persistence
            .save(&self.domain, &events, self.settings.max_events)
            .await
    }

    /// Flushes pending work and stops accepting input.
    pub async fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.flush_persistence().await;
        self.closed = true;
        self.services.bus.unregister(&self.context);
        metrics().active_sessions.dec();
        info!(tab_id = self.tab_id, domain = %self.domain, "Page session torn down");
    }

    pub fn request_render(&mut self, now: Instant) -> Option<RenderOutcome> {
        match self.renderer.request_render(now) {
            ScheduleDecision::RenderNow => Some(self.render(now)),
            ScheduleDecision::Deferred(_) => None,
        }
    }

    fn render(&mut self, now: Instant) -> RenderOutcome {
        let events = self.buffer.events();
        let groups = self.grouping.is_enabled().then(|| self.grouping.groups());
        let input = RenderInput {
            events: &events,
            groups: groups.as_deref(),
            filter: &self.filter,
            persistence_enabled: self.settings.persist_events,
        };
        self.renderer.render(now, &input)
    }

    fn render_if_due(&mut self, now: Instant) -> Option<RenderOutcome> {
        let events = self.buffer.events();
        let groups = self.grouping.is_enabled().then(|| self.grouping.groups());
        let input = RenderInput {
            events: &events,
            groups: groups.as_deref(),
            filter: &self.filter,
            persistence_enabled: self.settings.persist_events,
        };
        self.renderer.render_if_due(now, &input)
    }

    async fn copy_event(&mut self, event_id: &str, now: Instant) -> bool {
        let Some(text) = self.buffer.get_by_id(event_id).map(Event::payload_text) else {
            self.renderer.show_notice("Event no longer available", now);
            return false;
        };
        match self.services.clipboard.write_text(&text).await {
            Ok(()) => {
                self.renderer.show_notice("Copied to clipboard", now);
                true
            }
            Err(e) => {
                debug!(event_id, error = %e, "Clipboard write failed");
                self.renderer.show_notice("Failed to copy event", now);
                false
            }
        }
    }

    /// Settings change from a user action; an invalid patch is only logged.
    async fn patch_quietly(&mut self, patch: SettingsPatch, now: Instant) {
        if let Err(e) = self.update_settings(patch, now).await {
            debug!(error = %e, "Ignoring invalid settings change");
        }
    }

    async fn save_filters(&mut self, now: Instant) {
        let config = self.filter.config();
        let patch = SettingsPatch {
            event_filters: Some(config.event_filters.clone()),
            filter_mode: Some(config.filter_mode),
            ..Default::default()
        };
        self.patch_quietly(patch, now).await;
    }

    /// Drops evicted events from their groups and restamps the buffer.
    fn prune_groups(&mut self) {
        let buffer = &self.buffer;
        self.grouping.retain_events(|id| buffer.contains(id));
        let grouping = &self.grouping;
        self.buffer.retag_groups(|id| grouping.group_id_of(id));
    }

    fn regroup(&mut self) {
        self.grouping.rebuild_groups(&self.buffer.events());
        let grouping = &self.grouping;
        self.buffer.retag_groups(|id| grouping.group_id_of(id));
    }

    fn schedule_persist(&mut self, now: Instant) {
        if self.settings.persist_events {
            self.persist_due = Some(now + Duration::from_millis(PERSIST_DEBOUNCE_MS));
        }
    }

    fn check_minimize(&mut self, now: Instant) {
        self.minimize_due = self
            .grouping
            .all_collapsed()
            .then(|| now + Duration::from_millis(MINIMIZE_AFTER_COLLAPSE_MS));
    }

    fn notify_background(&self, message: Message) {
        let envelope = Envelope::for_tab(message, self.tab_id);
        if !self
            .services
            .bus
            .notify(&self.context, &ContextId::Background, &envelope)
        {
            trace!(tab_id = self.tab_id, "No background listener");
        }
    }
}
