//! Overlay renderer.

use std::collections::HashMap;
use std::time::Duration;

use monitor_core::limits::{NEW_EVENT_HIGHLIGHT_MS, NOTICE_LIFETIME_MS};
use monitor_core::{
    Event, EventGroup, FilterEngine, OverlayPosition, OverlaySize, SearchScope, Settings,
};
use serde::{Deserialize, Serialize};
use telemetry::metrics;
use tokio::time::Instant;
use tracing::trace;

use crate::geometry::{self, Viewport};
use crate::markup;
use crate::modal::FilterModal;
use crate::pagination::Pagination;
use crate::reconcile::{diff, RenderContext, RenderMode};
use crate::schedule::{RenderScheduler, ScheduleDecision};
use crate::sink::{OverlayChrome, RenderSink, RenderedRow};

const EMPTY_ROW_KEY: &str = "dlm-empty";

/// What a render pass looks at. Borrowed from the session's components.
pub struct RenderInput<'a> {
    /// Buffer contents, newest first
    pub events: &'a [Event],
    /// Present when grouping is enabled
    pub groups: Option<&'a [EventGroup]>,
    pub filter: &'a FilterEngine,
    pub persistence_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Overlay hidden or minimized, rows untouched
    Skipped,
    Unchanged,
    Prepended { inserted: usize, trimmed: usize },
    Full { rows: usize },
}

/// Answer to `GET_OVERLAY_STATE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayState {
    pub enabled: bool,
    pub minimized: bool,
    pub position: OverlayPosition,
    pub size: OverlaySize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub event_count: usize,
    pub visible_count: usize,
}

#[derive(Clone)]
enum ViewItem<'a> {
    Event(&'a Event),
    Group {
        key: String,
        group: &'a EventGroup,
        events: Vec<&'a Event>,
    },
    Empty {
        filters_active: bool,
    },
}

impl ViewItem<'_> {
    fn key(&self) -> &str {
        match self {
            Self::Event(event) => &event.id,
            Self::Group { key, .. } => key,
            Self::Empty { .. } => EMPTY_ROW_KEY,
        }
    }

    fn markup(&self) -> String {
        match self {
            Self::Event(event) => markup::event_row(event),
            Self::Group { group, events, .. } => markup::group_row(group, events),
            Self::Empty { filters_active } => markup::empty_state(*filters_active),
        }
    }
}

/// Filtered (and grouped) view, newest first.
fn build_view<'a>(input: &RenderInput<'a>) -> Vec<ViewItem<'a>> {
    let passes = |e: &Event| input.filter.passes(e, SearchScope::NameAndPayload);
    match input.groups {
        Some(groups) => groups
            .iter()
            .filter_map(|group| {
                let events: Vec<&Event> = group.events.iter().filter(|e| passes(e)).collect();
                if events.is_empty() {
                    return None;
                }
                // Growing or collapsing a group changes its key and forces a rebuild.
                let key = format!("{}:{}:{}", group.id, events.len(), u8::from(group.collapsed));
                Some(ViewItem::Group { key, group, events })
            })
            .collect(),
        None => input
            .events
            .iter()
            .filter(|e| passes(e))
            .map(ViewItem::Event)
            .collect(),
    }
}

/// Incremental list renderer for one overlay.
pub struct OverlayRenderer<S> {
    sink: S,
    scheduler: RenderScheduler,
    pagination: Pagination,
    modal: FilterModal,
    viewport: Viewport,
    enabled: bool,
    minimized: bool,
    position: OverlayPosition,
    size: OverlaySize,
    rendered_keys: Vec<String>,
    last_fingerprint: Option<u64>,
    highlights: HashMap<String, Instant>,
    highlight_ttl: Duration,
    notice: Option<(String, Instant)>,
    event_count: usize,
    visible_count: usize,
}

impl<S: RenderSink> OverlayRenderer<S> {
    pub fn new(sink: S, settings: &Settings) -> Self {
        Self {
            sink,
            scheduler: RenderScheduler::default(),
            pagination: Pagination::new(settings.page_size),
            modal: FilterModal::default(),
            viewport: Viewport::default(),
            enabled: settings.overlay_enabled,
            minimized: settings.overlay_minimized,
            position: settings.overlay_position,
            size: settings.overlay_size,
            rendered_keys: Vec::new(),
            last_fingerprint: None,
            highlights: HashMap::new(),
            highlight_ttl: Duration::from_millis(NEW_EVENT_HIGHLIGHT_MS),
            notice: None,
            event_count: 0,
            visible_count: 0,
        }
    }

    /// Takes over the overlay part of new settings.
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.enabled = settings.overlay_enabled;
        self.minimized = settings.overlay_minimized;
        self.position = settings.overlay_position;
        self.size = settings.overlay_size;
        if self.pagination.page_size != settings.page_size {
            self.pagination.set_page_size(settings.page_size);
        }
    }

    pub fn request_render(&mut self, now: Instant) -> ScheduleDecision {
        self.scheduler.request(now)
    }

    /// Paints if a deferred render is due.
    pub fn render_if_due(&mut self, now: Instant, input: &RenderInput<'_>) -> Option<RenderOutcome> {
        self.scheduler
            .is_due(now)
            .then(|| self.render(now, input))
    }

    /// Paints the current view, choosing between prepend and full rebuild.
    pub fn render(&mut self, now: Instant, input: &RenderInput<'_>) -> RenderOutcome {
        let started = std::time::Instant::now();
        self.scheduler.mark_rendered(now);
        self.event_count = input.events.len();

        let view = build_view(input);
        self.visible_count = view.len();
        self.pagination.clamp(self.visible_count);

        if !self.enabled || self.minimized {
            self.rendered_keys.clear();
            self.last_fingerprint = None;
            self.update_chrome(input, now);
            return RenderOutcome::Skipped;
        }

        let config = input.filter.config();
        let fingerprint = RenderContext {
            page: self.pagination.page,
            search_text: config.search_text.clone(),
            event_filters: config.event_filters.clone(),
            filter_mode: config.filter_mode,
            persistence_enabled: input.persistence_enabled,
            grouped: input.groups.is_some(),
        }
        .fingerprint();

        let mut page = self.pagination.slice(&view).to_vec();
        if page.is_empty() {
            page.push(ViewItem::Empty {
                filters_active: config.is_active(),
            });
        }

        let plan = if self.last_fingerprint == Some(fingerprint) {
            diff(&self.rendered_keys, &page, |item| item.key())
        } else {
            diff(&[], &page, |item| item.key())
        };

        let outcome = match plan.mode {
            RenderMode::Unchanged => RenderOutcome::Unchanged,
            RenderMode::Prepend { trim_tail } => {
                // Past the first page, prepended rows slid over from the
                // previous page rather than being captured just now.
                let fresh = self.pagination.page == 0;
                let expires = now + self.highlight_ttl;
                let rows: Vec<RenderedRow> = plan
                    .items
                    .iter()
                    .map(|item| {
                        if fresh {
                            self.highlights.insert(item.key().to_string(), expires);
                        }
                        RenderedRow {
                            key: item.key().to_string(),
                            html: item.markup(),
                            highlighted: fresh,
                        }
                    })
                    .collect();
                let inserted = rows.len();
                self.sink.prepend_rows(rows, trim_tail);
                metrics().renders_prepend.inc();
                RenderOutcome::Prepended {
                    inserted,
                    trimmed: trim_tail,
                }
            }
            RenderMode::Full => {
                let rows: Vec<RenderedRow> = plan
                    .items
                    .iter()
                    .map(|item| RenderedRow {
                        key: item.key().to_string(),
                        html: item.markup(),
                        highlighted: self.highlights.contains_key(item.key()),
                    })
                    .collect();
                let count = rows.len();
                self.sink.replace_rows(rows);
                metrics().renders_full.inc();
                RenderOutcome::Full { rows: count }
            }
        };

        self.rendered_keys = page.iter().map(|item| item.key().to_string()).collect();
        let rendered = &self.rendered_keys;
        self.highlights.retain(|key, _| rendered.contains(key));
        self.last_fingerprint = Some(fingerprint);
        self.update_chrome(input, now);

        metrics()
            .render_latency_us
            .observe(started.elapsed().as_micros() as u64);
        trace!(?outcome, rows = self.rendered_keys.len(), "Rendered overlay");
        outcome
    }

    /// Clears expired row highlights in place. Returns true when an expired
    /// notice needs a chrome refresh.
    pub fn expire(&mut self, now: Instant) -> bool {
        let expired: Vec<String> = self
            .highlights
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.highlights.remove(&key);
            self.sink.set_highlight(&key, false);
        }

        match &self.notice {
            Some((_, at)) if *at <= now => {
                self.notice = None;
                true
            }
            _ => false,
        }
    }

    /// Earliest pending render, highlight expiry or notice expiry.
    pub fn next_deadline(&self) -> Option<Instant> {
        let highlight = self.highlights.values().min().copied();
        let notice = self.notice.as_ref().map(|(_, at)| *at);
        [self.scheduler.deadline(), highlight, notice]
            .into_iter()
            .flatten()
            .min()
    }

    /// Shows a transient message that clears itself.
    pub fn show_notice(&mut self, text: impl Into<String>, now: Instant) {
        self.notice = Some((text.into(), now + Duration::from_millis(NOTICE_LIFETIME_MS)));
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_ref().map(|(text, _)| text.as_str())
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_minimized(&mut self, minimized: bool) {
        self.minimized = minimized;
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.position = geometry::clamp_position(self.position, self.size, viewport);
    }

    pub fn drag_by(&mut self, dx: f64, dy: f64) -> OverlayPosition {
        self.position = geometry::drag(self.position, dx, dy, self.size, self.viewport);
        self.position
    }

    pub fn resize_by(&mut self, dw: f64, dh: f64) -> OverlaySize {
        self.size = geometry::resize(self.size, dw, dh, self.viewport);
        self.position = geometry::clamp_position(self.position, self.size, self.viewport);
        self.size
    }

    pub fn next_page(&mut self) -> bool {
        self.pagination.next(self.visible_count)
    }

    pub fn prev_page(&mut self) -> bool {
        self.pagination.prev()
    }

    pub fn first_page(&mut self) -> bool {
        self.pagination.first()
    }

    pub fn modal(&self) -> &FilterModal {
        &self.modal
    }

    pub fn modal_mut(&mut self) -> &mut FilterModal {
        &mut self.modal
    }

    /// Forgets what is on screen so the next render rebuilds everything.
    pub fn invalidate(&mut self) {
        self.rendered_keys.clear();
        self.last_fingerprint = None;
    }

    pub fn rendered_keys(&self) -> &[String] {
        &self.rendered_keys
    }

    pub fn is_highlighted(&self, key: &str) -> bool {
        self.highlights.contains_key(key)
    }

    pub fn state(&self) -> OverlayState {
        OverlayState {
            enabled: self.enabled,
            minimized: self.minimized,
            position: self.position,
            size: self.size,
            page: self.pagination.page,
            page_size: self.pagination.page_size,
            total_pages: self.pagination.total_pages(self.visible_count),
            event_count: self.event_count,
            visible_count: self.visible_count,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn update_chrome(&mut self, input: &RenderInput<'_>, now: Instant) {
        let config = input.filter.config();
        let title = if self.visible_count == self.event_count || input.groups.is_some() {
            format!("{} events", self.event_count)
        } else {
            format!("{} of {} events", self.visible_count, self.event_count)
        };
        let notice = self
            .notice
            .as_ref()
            .filter(|(_, at)| *at > now)
            .map(|(text, _)| text.clone());
        let chrome = OverlayChrome {
            visible: self.enabled,
            minimized: self.minimized,
            position: self.position,
            size: self.size,
            title,
            page_label: self.pagination.label(self.visible_count),
            event_filters: config.event_filters.clone(),
            filter_mode: config.filter_mode,
            search_text: config.search_text.clone(),
            persistence_enabled: input.persistence_enabled,
            notice,
            modal: self.modal.view(input.events, config),
        };
        self.sink.update_chrome(&chrome);
    }
}
