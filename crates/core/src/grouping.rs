//! Time-window and trigger-based event grouping.
//!
//! One decision function drives both the incremental path
//! (`add_event_to_group`) and the cold-start path (`rebuild_groups`); given
//! the same events in chronological order both produce identical groups.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::events::Event;
use crate::limits::DEFAULT_GROUP_TIME_WINDOW_MS;

/// Grouping heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingMode {
    /// New group after a quiet gap longer than the window
    #[default]
    Time,
    /// New group whenever a trigger event arrives
    Trigger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingSettings {
    pub enabled: bool,
    pub mode: GroupingMode,
    pub time_window_ms: i64,
    pub trigger_events: Vec<String>,
}

impl Default for GroupingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: GroupingMode::Time,
            time_window_ms: DEFAULT_GROUP_TIME_WINDOW_MS,
            trigger_events: Vec::new(),
        }
    }
}

impl GroupingSettings {
    fn matches_trigger(&self, event_name: &str) -> bool {
        let name = event_name.to_lowercase();
        self.trigger_events
            .iter()
            .filter(|t| !t.is_empty())
            .any(|t| name.contains(&t.to_lowercase()))
    }
}

/// A contiguous run of events. `events` is newest-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventGroup {
    pub id: String,
    pub events: Vec<Event>,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_event: Option<String>,
    /// View-only; the engine tracks collapse state by group id
    #[serde(default)]
    pub collapsed: bool,
}

impl EventGroup {
    fn start(event: Event, trigger_event: Option<String>) -> Self {
        Self {
            id: group_id_for(&event),
            start_time: event.timestamp,
            end_time: event.timestamp,
            events: vec![event],
            trigger_event,
            collapsed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_time - self.start_time
    }
}

/// Group ids derive from the opening event so they are stable across rebuilds.
fn group_id_for(first: &Event) -> String {
    format!("group-{}", first.id)
}

#[derive(Debug, PartialEq, Eq)]
enum Decision {
    Start { trigger_event: Option<String> },
    Append,
}

/// Decides whether `event` opens a new group.
///
/// Without a current group the event always opens one. In trigger mode the
/// opening event only records `trigger_event` when its name matched.
fn decide(
    settings: &GroupingSettings,
    has_current: bool,
    last_event_time: Option<i64>,
    event: &Event,
) -> Decision {
    match settings.mode {
        GroupingMode::Time => {
            let gap_exceeded = last_event_time
                .map(|last| event.timestamp - last > settings.time_window_ms)
                .unwrap_or(true);
            if !has_current || gap_exceeded {
                Decision::Start {
                    trigger_event: None,
                }
            } else {
                Decision::Append
            }
        }
        GroupingMode::Trigger => {
            if settings.matches_trigger(&event.event_name) {
                Decision::Start {
                    trigger_event: Some(event.event_name.clone()),
                }
            } else if !has_current {
                Decision::Start {
                    trigger_event: None,
                }
            } else {
                Decision::Append
            }
        }
    }
}

/// Partitions the event stream into groups and tracks collapse state.
#[derive(Default)]
pub struct GroupingEngine {
    settings: GroupingSettings,
    /// Newest group first; `groups[0]` is the current group
    groups: Vec<EventGroup>,
    last_event_time: Option<i64>,
    membership: HashMap<String, String>,
    collapsed: HashSet<String>,
}

impl GroupingEngine {
    pub fn new(settings: GroupingSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &GroupingSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Installs new settings. Returns true when groups must be rebuilt.
    pub fn update_settings(&mut self, settings: GroupingSettings) -> bool {
        if self.settings == settings {
            return false;
        }
        self.settings = settings;
        true
    }

    /// Places one live event and stamps its `group_id`.
    pub fn add_event_to_group(&mut self, event: &mut Event) -> Option<String> {
        if !self.settings.enabled {
            event.group_id = None;
            return None;
        }

        let decision = decide(
            &self.settings,
            !self.groups.is_empty(),
            self.last_event_time,
            event,
        );
        let group_id = match decision {
            Decision::Start { trigger_event } => {
                let id = group_id_for(event);
                event.group_id = Some(id.clone());
                self.groups
                    .insert(0, EventGroup::start(event.clone(), trigger_event));
                id
            }
            Decision::Append => {
                let current = &mut self.groups[0];
                event.group_id = Some(current.id.clone());
                current.events.insert(0, event.clone());
                current.end_time = event.timestamp;
                current.id.clone()
            }
        };

        self.last_event_time = Some(event.timestamp);
        self.membership.insert(event.id.clone(), group_id.clone());
        Some(group_id)
    }

    /// Recomputes every group from scratch.
    ///
    /// `events` may be in any order; they are replayed oldest-first (ties keep
    /// their newest-first input order reversed, i.e. capture order).
    pub fn rebuild_groups(&mut self, events: &[Event]) {
        self.groups.clear();
        self.membership.clear();
        self.last_event_time = None;

        if !self.settings.enabled {
            return;
        }

        let mut ordered: Vec<&Event> = events.iter().rev().collect();
        ordered.sort_by_key(|e| e.timestamp);

        let mut chronological: Vec<EventGroup> = Vec::new();
        for event in ordered {
            let mut event = event.clone();
            let decision = decide(
                &self.settings,
                !chronological.is_empty(),
                self.last_event_time,
                &event,
            );
            let opening = match decision {
                Decision::Start { trigger_event } => Some(trigger_event),
                Decision::Append => None,
            };
            match (opening, chronological.last_mut()) {
                (None, Some(current)) => {
                    event.group_id = Some(current.id.clone());
                    current.end_time = event.timestamp;
                    current.events.push(event.clone());
                }
                (opening, _) => {
                    event.group_id = Some(group_id_for(&event));
                    chronological.push(EventGroup::start(event.clone(), opening.flatten()));
                }
            }
            self.last_event_time = Some(event.timestamp);
            if let Some(group_id) = event.group_id {
                self.membership.insert(event.id, group_id);
            }
        }

        for group in chronological.iter_mut() {
            group.events.reverse();
        }
        chronological.reverse();
        self.groups = chronological;
    }

    /// Drops events no longer held by the buffer, and any group left empty.
    ///
    /// A group that lost its opening event is re-keyed on its new oldest
    /// event, matching what `rebuild_groups` would produce; collapse state
    /// follows the group to its new id.
    pub fn retain_events<F>(&mut self, is_live: F)
    where
        F: Fn(&str) -> bool,
    {
        let mut renamed: Vec<(String, String)> = Vec::new();
        for group in self.groups.iter_mut() {
            group.events.retain(|e| is_live(&e.id));
            let (Some(newest), Some(oldest)) = (group.events.first(), group.events.last()) else {
                continue;
            };
            group.end_time = newest.timestamp;
            group.start_time = oldest.timestamp;

            let id = group_id_for(oldest);
            if id == group.id {
                continue;
            }
            group.trigger_event = match decide(&self.settings, false, None, oldest) {
                Decision::Start { trigger_event } => trigger_event,
                Decision::Append => None,
            };
            for event in group.events.iter_mut() {
                event.group_id = Some(id.clone());
                self.membership.insert(event.id.clone(), id.clone());
            }
            renamed.push((std::mem::replace(&mut group.id, id.clone()), id));
        }
        self.groups.retain(|g| !g.is_empty());
        self.membership.retain(|event_id, _| is_live(event_id));
        if self.groups.is_empty() {
            self.last_event_time = None;
        }

        for (old, new) in renamed {
            if self.collapsed.remove(&old) {
                self.collapsed.insert(new);
            }
        }
    }

    /// Clears groups and collapse state.
    pub fn clear_groups(&mut self) {
        self.groups.clear();
        self.membership.clear();
        self.collapsed.clear();
        self.last_event_time = None;
    }

    /// Groups newest-first with collapse state applied.
    pub fn groups(&self) -> Vec<EventGroup> {
        self.groups
            .iter()
            .map(|g| EventGroup {
                collapsed: self.collapsed.contains(&g.id),
                ..g.clone()
            })
            .collect()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group_id_of(&self, event_id: &str) -> Option<String> {
        self.membership.get(event_id).cloned()
    }

    pub fn is_collapsed(&self, group_id: &str) -> bool {
        self.collapsed.contains(group_id)
    }

    /// Flips collapse state; returns the new state.
    pub fn toggle_collapsed(&mut self, group_id: &str) -> bool {
        if self.collapsed.remove(group_id) {
            false
        } else {
            self.collapsed.insert(group_id.to_string());
            true
        }
    }

    pub fn set_all_collapsed(&mut self, collapsed: bool) {
        if collapsed {
            self.collapsed
                .extend(self.groups.iter().map(|g| g.id.clone()));
        } else {
            for group in &self.groups {
                self.collapsed.remove(&group.id);
            }
        }
    }

    /// True when there is at least one group and every group is collapsed.
    pub fn all_collapsed(&self) -> bool {
        !self.groups.is_empty() && self.groups.iter().all(|g| self.collapsed.contains(&g.id))
    }
}
