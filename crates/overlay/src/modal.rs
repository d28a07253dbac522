//! Filter modal state.

use std::collections::BTreeSet;

use monitor_core::{Event, FilterConfig, FilterMode};
use serde::Serialize;

/// Maximum number of event-name suggestions offered.
const MAX_SUGGESTIONS: usize = 12;

/// What the modal currently shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalView {
    pub draft: String,
    pub filter_mode: FilterMode,
    pub event_filters: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Open/closed state and the text being typed.
///
/// The modal never edits filters itself; the session applies what
/// [`FilterModal::submit`] returns through the filter engine.
#[derive(Debug, Clone, Default)]
pub struct FilterModal {
    open: bool,
    draft: String,
}

impl FilterModal {
    pub fn open(&mut self) {
        self.open = true;
        self.draft.clear();
    }

    pub fn close(&mut self) {
        self.open = false;
        self.draft.clear();
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn set_draft(&mut self, text: &str) {
        self.draft = text.to_string();
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Takes the typed pattern, if any, leaving the modal open.
    pub fn submit(&mut self) -> Option<String> {
        let pattern = self.draft.trim().to_string();
        self.draft.clear();
        (!pattern.is_empty()).then_some(pattern)
    }

    /// Distinct seen event names that match the draft and are not already
    /// filtered, sorted.
    pub fn suggestions(&self, events: &[Event], config: &FilterConfig) -> Vec<String> {
        let draft = self.draft.trim().to_lowercase();
        let taken: BTreeSet<String> = config
            .event_filters
            .iter()
            .map(|f| f.to_lowercase())
            .collect();
        events
            .iter()
            .map(|e| e.event_name.as_str())
            .filter(|name| !taken.contains(&name.to_lowercase()))
            .filter(|name| draft.is_empty() || name.to_lowercase().contains(&draft))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(str::to_string)
            .collect()
    }

    /// View for the chrome, `None` when closed.
    pub fn view(&self, events: &[Event], config: &FilterConfig) -> Option<ModalView> {
        self.open.then(|| ModalView {
            draft: self.draft.clone(),
            filter_mode: config.filter_mode,
            event_filters: config.event_filters.clone(),
            suggestions: self.suggestions(events, config),
        })
    }
}
