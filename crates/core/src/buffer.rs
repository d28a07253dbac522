//! Bounded newest-first event buffer.

use std::collections::VecDeque;

use tokio::sync::watch;
use tracing::debug;

use crate::events::Event;

/// Ordered store of captured events, newest first.
///
/// Every change publishes a fresh copy of the full list on a watch channel,
/// so subscribers never see internal state.
pub struct EventBuffer {
    events: VecDeque<Event>,
    max_events: usize,
    notifier: watch::Sender<Vec<Event>>,
}

impl EventBuffer {
    pub fn new(max_events: usize) -> Self {
        let (notifier, _) = watch::channel(Vec::new());
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events: max_events.max(1),
            notifier,
        }
    }

    /// Subscribes to full-list change notifications.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Event>> {
        self.notifier.subscribe()
    }

    /// Inserts an event at the front. Returns false for a duplicate id.
    pub fn add(&mut self, event: Event) -> bool {
        if self.contains(&event.id) {
            debug!(event_id = %event.id, "Ignoring duplicate event");
            return false;
        }
        self.events.push_front(event);
        self.events.truncate(self.max_events);
        self.notify();
        true
    }

    /// Replaces the contents wholesale, keeping the first occurrence of each id.
    pub fn set_all(&mut self, events: Vec<Event>) {
        self.events.clear();
        for event in events {
            if self.events.len() >= self.max_events {
                break;
            }
            if !self.contains(&event.id) {
                self.events.push_back(event);
            }
        }
        self.notify();
    }

    /// Changes the capacity. Returns true when events were evicted.
    pub fn set_max_events(&mut self, max_events: usize) -> bool {
        self.max_events = max_events.max(1);
        if self.events.len() > self.max_events {
            self.events.truncate(self.max_events);
            self.notify();
            return true;
        }
        false
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.notify();
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get_by_id(id).is_some()
    }

    /// Copy of the current contents, newest first.
    pub fn events(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    /// Rewrites the group back-reference of every event.
    ///
    /// Does not notify: group ids are presentation metadata derived from the
    /// same list subscribers already hold.
    pub fn retag_groups<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for event in self.events.iter_mut() {
            event.group_id = lookup(&event.id);
        }
    }

    fn notify(&self) {
        self.notifier.send_replace(self.events());
    }
}
