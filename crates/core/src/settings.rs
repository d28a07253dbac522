//! Pipeline settings.
//!
//! `Settings` is an immutable value: components receive a fresh copy through
//! their `update_settings` entry point and never share a mutable instance.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{Error, Result};
use crate::filter::{FilterConfig, FilterMode};
use crate::grouping::{GroupingMode, GroupingSettings};
use crate::limits::{
    DEFAULT_GROUP_TIME_WINDOW_MS, DEFAULT_MAX_EVENTS, DEFAULT_PAGE_SIZE,
};

/// Overlay anchor position in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayPosition {
    pub x: f64,
    pub y: f64,
}

impl Default for OverlayPosition {
    fn default() -> Self {
        Self { x: 20.0, y: 20.0 }
    }
}

/// Overlay dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlaySize {
    pub width: f64,
    pub height: f64,
}

impl Default for OverlaySize {
    fn default() -> Self {
        Self {
            width: 420.0,
            height: 520.0,
        }
    }
}

fn validate_patterns(patterns: &[String]) -> std::result::Result<(), ValidationError> {
    if patterns.iter().any(|p| p.trim().is_empty()) {
        let mut err = ValidationError::new("empty_pattern");
        err.message = Some("patterns must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// Settings for one tracked page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_true")]
    pub overlay_enabled: bool,
    #[serde(default = "default_max_events")]
    #[validate(range(min = 1, max = 5000))]
    pub max_events: usize,
    #[serde(default)]
    pub grouping_enabled: bool,
    #[serde(default)]
    pub grouping_mode: GroupingMode,
    #[serde(default = "default_time_window_ms")]
    #[validate(range(min = 1, max = 600000))]
    pub grouping_time_window_ms: i64,
    #[serde(default = "default_trigger_events")]
    #[validate(custom(function = "validate_patterns"))]
    pub grouping_trigger_events: Vec<String>,
    #[serde(default)]
    pub persist_events: bool,
    /// Maximum age of restored events (ms); 0 keeps everything
    #[serde(default)]
    #[validate(range(min = 0))]
    pub persist_max_age_ms: i64,
    #[serde(default)]
    #[validate(custom(function = "validate_patterns"))]
    pub event_filters: Vec<String>,
    #[serde(default)]
    pub filter_mode: FilterMode,
    #[serde(default)]
    pub overlay_position: OverlayPosition,
    #[serde(default)]
    pub overlay_size: OverlaySize,
    #[serde(default)]
    pub overlay_minimized: bool,
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, max = 500))]
    pub page_size: usize,
    #[serde(default = "default_data_layer_names")]
    #[validate(length(min = 1), custom(function = "validate_patterns"))]
    pub data_layer_names: Vec<String>,
    #[serde(default)]
    pub debug_logging: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_events() -> usize {
    DEFAULT_MAX_EVENTS
}

fn default_time_window_ms() -> i64 {
    DEFAULT_GROUP_TIME_WINDOW_MS
}

fn default_trigger_events() -> Vec<String> {
    vec!["gtm.js".to_string(), "page_view".to_string()]
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_data_layer_names() -> Vec<String> {
    vec!["dataLayer".to_string()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            overlay_enabled: default_true(),
            max_events: default_max_events(),
            grouping_enabled: false,
            grouping_mode: GroupingMode::default(),
            grouping_time_window_ms: default_time_window_ms(),
            grouping_trigger_events: default_trigger_events(),
            persist_events: false,
            persist_max_age_ms: 0,
            event_filters: Vec::new(),
            filter_mode: FilterMode::default(),
            overlay_position: OverlayPosition::default(),
            overlay_size: OverlaySize::default(),
            overlay_minimized: false,
            page_size: default_page_size(),
            data_layer_names: default_data_layer_names(),
            debug_logging: false,
        }
    }
}

impl Settings {
    /// Validates the settings, mapping failures to `CFG_001`.
    pub fn validated(self) -> Result<Self> {
        self.validate()
            .map_err(|e| Error::invalid_settings(e.to_string()))?;
        Ok(self)
    }

    /// Returns a copy with the patch applied, validated as a whole.
    pub fn merged(&self, patch: &SettingsPatch) -> Result<Self> {
        let mut next = self.clone();
        patch.apply_to(&mut next);
        next.validated()
    }

    pub fn grouping(&self) -> GroupingSettings {
        GroupingSettings {
            enabled: self.grouping_enabled,
            mode: self.grouping_mode,
            time_window_ms: self.grouping_time_window_ms,
            trigger_events: self.grouping_trigger_events.clone(),
        }
    }

    /// Persisted filter part of the settings; search text is transient.
    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            event_filters: self.event_filters.clone(),
            filter_mode: self.filter_mode,
            search_text: String::new(),
        }
    }

    /// Which component groups differ between two settings values.
    pub fn changes(&self, next: &Settings) -> SettingsChanges {
        SettingsChanges {
            max_events: self.max_events != next.max_events,
            grouping: self.grouping() != next.grouping(),
            filters: self.event_filters != next.event_filters
                || self.filter_mode != next.filter_mode,
            persistence: self.persist_events != next.persist_events
                || self.persist_max_age_ms != next.persist_max_age_ms,
            overlay: self.overlay_enabled != next.overlay_enabled
                || self.overlay_minimized != next.overlay_minimized
                || self.overlay_position != next.overlay_position
                || self.overlay_size != next.overlay_size
                || self.page_size != next.page_size,
            capture: self.data_layer_names != next.data_layer_names,
        }
    }
}

/// Flags describing which parts of the pipeline a settings update touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsChanges {
    pub max_events: bool,
    pub grouping: bool,
    pub filters: bool,
    pub persistence: bool,
    pub overlay: bool,
    pub capture: bool,
}

impl SettingsChanges {
    pub fn any(&self) -> bool {
        self.max_events
            || self.grouping
            || self.filters
            || self.persistence
            || self.overlay
            || self.capture
    }
}

/// Partial settings carried by `UPDATE_SETTINGS`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub overlay_enabled: Option<bool>,
    pub max_events: Option<usize>,
    pub grouping_enabled: Option<bool>,
    pub grouping_mode: Option<GroupingMode>,
    pub grouping_time_window_ms: Option<i64>,
    pub grouping_trigger_events: Option<Vec<String>>,
    pub persist_events: Option<bool>,
    pub persist_max_age_ms: Option<i64>,
    pub event_filters: Option<Vec<String>>,
    pub filter_mode: Option<FilterMode>,
    pub overlay_position: Option<OverlayPosition>,
    pub overlay_size: Option<OverlaySize>,
    pub overlay_minimized: Option<bool>,
    pub page_size: Option<usize>,
    pub data_layer_names: Option<Vec<String>>,
    pub debug_logging: Option<bool>,
}

macro_rules! apply_fields {
    ($patch:expr, $target:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = &$patch.$field {
                $target.$field = value.clone();
            }
        )+
    };
}

macro_rules! overlay_fields {
    ($patch:expr, $target:expr, $($field:ident),+ $(,)?) => {
        $(
            if $patch.$field.is_some() {
                $target.$field = $patch.$field.clone();
            }
        )+
    };
}

impl SettingsPatch {
    /// Layers `newer` on top of this patch; fields `newer` sets win.
    pub fn merge_from(&mut self, newer: &SettingsPatch) {
        overlay_fields!(
            newer,
            self,
            overlay_enabled,
            max_events,
            grouping_enabled,
            grouping_mode,
            grouping_time_window_ms,
            grouping_trigger_events,
            persist_events,
            persist_max_age_ms,
            event_filters,
            filter_mode,
            overlay_position,
            overlay_size,
            overlay_minimized,
            page_size,
            data_layer_names,
            debug_logging,
        );
    }

    pub fn apply_to(&self, settings: &mut Settings) {
        apply_fields!(
            self,
            settings,
            overlay_enabled,
            max_events,
            grouping_enabled,
            grouping_mode,
            grouping_time_window_ms,
            grouping_trigger_events,
            persist_events,
            persist_max_age_ms,
            event_filters,
            filter_mode,
            overlay_position,
            overlay_size,
            overlay_minimized,
            page_size,
            data_layer_names,
            debug_logging,
        );
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
