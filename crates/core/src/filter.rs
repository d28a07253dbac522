//! Include/exclude filter engine with free-text search.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::events::Event;

/// How `event_filters` are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Only events matching a pattern pass
    Include,
    /// Events matching any pattern are hidden
    #[default]
    Exclude,
}

/// Where search text is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    /// Event name only
    #[default]
    Name,
    /// Event name or serialized payload
    NameAndPayload,
}

/// Filter configuration. `event_filters` holds no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    pub event_filters: Vec<String>,
    pub filter_mode: FilterMode,
    #[serde(default)]
    pub search_text: String,
}

impl FilterConfig {
    pub fn is_active(&self) -> bool {
        !self.event_filters.is_empty() || !self.search_text.is_empty()
    }
}

/// Evaluates the filter predicate and owns the mutable filter state.
pub struct FilterEngine {
    config: FilterConfig,
    notifier: watch::Sender<FilterConfig>,
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

impl FilterEngine {
    pub fn new(config: FilterConfig) -> Self {
        let config = FilterConfig {
            event_filters: dedupe(config.event_filters),
            ..config
        };
        let (notifier, _) = watch::channel(config.clone());
        Self { config, notifier }
    }

    /// Subscribes to "config changed" notifications.
    pub fn subscribe(&self) -> watch::Receiver<FilterConfig> {
        self.notifier.subscribe()
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Adds a pattern. Blank or already present patterns are ignored.
    pub fn add_filter(&mut self, pattern: &str) -> bool {
        let pattern = pattern.trim();
        if pattern.is_empty() || self.has_filter(pattern) {
            return false;
        }
        self.config.event_filters.push(pattern.to_string());
        self.changed();
        true
    }

    pub fn remove_filter(&mut self, pattern: &str) -> bool {
        let before = self.config.event_filters.len();
        let needle = pattern.trim().to_lowercase();
        self.config
            .event_filters
            .retain(|p| p.to_lowercase() != needle);
        if self.config.event_filters.len() != before {
            self.changed();
            return true;
        }
        false
    }

    /// Switches mode. A real switch always clears the pattern list.
    pub fn set_filter_mode(&mut self, mode: FilterMode) -> bool {
        if self.config.filter_mode == mode {
            return false;
        }
        self.config.filter_mode = mode;
        self.config.event_filters.clear();
        self.changed();
        true
    }

    pub fn set_search_text(&mut self, text: &str) -> bool {
        if self.config.search_text == text {
            return false;
        }
        self.config.search_text = text.to_string();
        self.changed();
        true
    }

    /// Clears patterns and search text, keeping the mode.
    pub fn clear_filters(&mut self) {
        self.config.event_filters.clear();
        self.config.search_text.clear();
        self.changed();
    }

    /// Replaces patterns and mode from settings, keeping the search text.
    pub fn apply(&mut self, filters: Vec<String>, mode: FilterMode) -> bool {
        let filters = dedupe(filters);
        if self.config.event_filters == filters && self.config.filter_mode == mode {
            return false;
        }
        self.config.event_filters = filters;
        self.config.filter_mode = mode;
        self.changed();
        true
    }

    pub fn has_filter(&self, pattern: &str) -> bool {
        let needle = pattern.trim().to_lowercase();
        self.config
            .event_filters
            .iter()
            .any(|p| p.to_lowercase() == needle)
    }

    /// Core predicate: pattern filter, then search text on the event name.
    pub fn event_passes_filter(&self, event: &Event) -> bool {
        self.passes(event, SearchScope::Name)
    }

    /// Predicate with the search layer widened to the chosen scope.
    pub fn passes(&self, event: &Event, scope: SearchScope) -> bool {
        let name = event.event_name.to_lowercase();
        if !self.passes_patterns(&name) {
            return false;
        }
        if self.config.search_text.is_empty() {
            return true;
        }
        let search = self.config.search_text.to_lowercase();
        if name.contains(&search) {
            return true;
        }
        match scope {
            SearchScope::Name => false,
            SearchScope::NameAndPayload => payload_matches(event, &search),
        }
    }

    pub fn filter_events(&self, events: &[Event]) -> Vec<Event> {
        self.filter_events_with(events, SearchScope::Name)
    }

    pub fn filter_events_with(&self, events: &[Event], scope: SearchScope) -> Vec<Event> {
        events
            .iter()
            .filter(|e| self.passes(e, scope))
            .cloned()
            .collect()
    }

    fn passes_patterns(&self, lower_name: &str) -> bool {
        if self.config.event_filters.is_empty() {
            return true;
        }
        let matched = self
            .config
            .event_filters
            .iter()
            .any(|p| lower_name.contains(&p.to_lowercase()));
        match self.config.filter_mode {
            FilterMode::Include => matched,
            FilterMode::Exclude => !matched,
        }
    }

    fn changed(&self) {
        self.notifier.send_replace(self.config.clone());
    }
}

/// Case-insensitive search of the serialized payload. `search` must be lowercase.
fn payload_matches(event: &Event, search: &str) -> bool {
    serde_json::to_string(&event.data)
        .map(|text| text.to_lowercase().contains(search))
        .unwrap_or(false)
}

fn dedupe(patterns: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(patterns.len());
    let mut out = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let trimmed = pattern.trim();
        let key = trimmed.to_lowercase();
        if trimmed.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(trimmed.to_string());
    }
    out
}
