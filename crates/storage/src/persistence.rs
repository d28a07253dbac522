//! Per-domain event snapshots that survive page reloads.

use std::sync::Arc;

use chrono::Utc;
use monitor_core::Event;
use serde::{Deserialize, Serialize};
use telemetry::{health, metrics};
use tracing::debug;

use crate::kv::{set_one, KeyValueStorage};

/// Storage key prefix for event snapshots.
pub const SNAPSHOT_KEY_PREFIX: &str = "persisted_events_";

/// Storage key holding the snapshot of a domain.
pub fn snapshot_key(domain: &str) -> String {
    format!("{}{}", SNAPSHOT_KEY_PREFIX, domain)
}

/// Stored shape of a domain snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub events: Vec<Event>,
    /// Write time (epoch ms)
    pub last_updated: i64,
}

/// Event snapshot store.
///
/// Never fails: every storage error is logged at debug level, counted, and
/// answered with an empty result or a skipped write.
#[derive(Clone)]
pub struct PersistenceStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl PersistenceStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Loads the snapshot of `domain`, dropping events older than `max_age_ms`.
    pub async fn load(&self, domain: &str, max_age_ms: i64) -> Vec<Event> {
        self.load_at(domain, max_age_ms, Utc::now().timestamp_millis())
            .await
    }

    /// `load` with an explicit clock. `max_age_ms == 0` keeps everything.
    ///
    /// Every returned event carries the persisted marker exactly once.
    pub async fn load_at(&self, domain: &str, max_age_ms: i64, now: i64) -> Vec<Event> {
        let key = snapshot_key(domain);
        let value = match self.storage.get(&key).await {
            Ok(Some(value)) => value,
            Ok(None) => return Vec::new(),
            Err(e) => {
                storage_failed("load", domain, &e);
                return Vec::new();
            }
        };
        health().storage.set_healthy();

        let snapshot: PersistedSnapshot = match serde_json::from_value(value) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(domain = %domain, error = %e, "Ignoring unreadable event snapshot");
                return Vec::new();
            }
        };

        let events: Vec<Event> = snapshot
            .events
            .into_iter()
            .filter(|e| max_age_ms <= 0 || now - e.timestamp <= max_age_ms)
            .map(|mut e| {
                e.mark_persisted();
                e
            })
            .collect();

        metrics().persist_loaded.inc_by(events.len() as u64);
        debug!(domain = %domain, count = events.len(), "Loaded persisted events");
        events
    }

    /// Writes the newest `max_events` events, without persisted markers.
    ///
    /// Returns whether the write reached storage.
    pub async fn save(&self, domain: &str, events: &[Event], max_events: usize) -> bool {
        let events: Vec<Event> = events
            .iter()
            .take(max_events)
            .cloned()
            .map(|mut e| {
                e.strip_persisted();
                e
            })
            .collect();
        let count = events.len();

        let snapshot = PersistedSnapshot {
            events,
            last_updated: Utc::now().timestamp_millis(),
        };
        let value = match serde_json::to_value(&snapshot) {
            Ok(value) => value,
            Err(e) => {
                debug!(domain = %domain, error = %e, "Failed to serialize event snapshot");
                metrics().persist_failures.inc();
                return false;
            }
        };

        match set_one(self.storage.as_ref(), &snapshot_key(domain), value).await {
            Ok(()) => {
                health().storage.set_healthy();
                metrics().persist_writes.inc();
                debug!(domain = %domain, count, "Persisted events");
                true
            }
            Err(e) => {
                storage_failed("save", domain, &e);
                false
            }
        }
    }

    /// Deletes the snapshot of `domain`.
    pub async fn clear(&self, domain: &str) -> bool {
        match self.storage.remove(&snapshot_key(domain)).await {
            Ok(()) => {
                debug!(domain = %domain, "Cleared persisted events");
                true
            }
            Err(e) => {
                storage_failed("clear", domain, &e);
                false
            }
        }
    }
}

fn storage_failed(op: &str, domain: &str, err: &monitor_core::Error) {
    metrics().persist_failures.inc();
    health().storage.set_unhealthy(err.to_string());
    debug!(op, domain = %domain, error = %err, "Persistence storage failed");
}
