//! Global and per-domain settings backed by key-value storage.

use std::sync::Arc;

use monitor_core::{Settings, SettingsPatch};
use serde_json::Value;
use telemetry::health;
use tokio::sync::broadcast;
use tracing::debug;

use crate::kv::{set_one, KeyValueStorage, StorageChange};

/// Key of the global settings object.
pub const GLOBAL_SETTINGS_KEY: &str = "settings";

/// Key of the per-domain override for `domain`.
pub fn domain_settings_key(domain: &str) -> String {
    format!("{}_{}", GLOBAL_SETTINGS_KEY, domain)
}

/// Whether a storage key holds settings (global or per-domain).
pub fn is_settings_key(key: &str) -> bool {
    key == GLOBAL_SETTINGS_KEY || key.starts_with("settings_")
}

/// Settings store. Reads fall back to the configured defaults on any failure.
#[derive(Clone)]
pub struct SettingsStore {
    storage: Arc<dyn KeyValueStorage>,
    defaults: Settings,
}

impl SettingsStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, defaults: Settings) -> Self {
        Self { storage, defaults }
    }

    pub fn defaults(&self) -> &Settings {
        &self.defaults
    }

    /// Effective settings: defaults, then the global object, then the
    /// override stored for `domain`.
    pub async fn load(&self, domain: Option<&str>) -> Settings {
        let mut keys = vec![GLOBAL_SETTINGS_KEY.to_string()];
        if let Some(domain) = domain {
            keys.push(domain_settings_key(domain));
        }

        let mut found = match self.storage.get_many(&keys).await {
            Ok(found) => found,
            Err(e) => {
                health().storage.set_unhealthy(e.to_string());
                debug!(error = %e, "Settings read failed, using defaults");
                return self.defaults.clone();
            }
        };

        let mut settings = self.defaults.clone();
        if let Some(global) = found.remove(GLOBAL_SETTINGS_KEY) {
            settings = self.merge_value(settings, global, GLOBAL_SETTINGS_KEY);
        }
        if let Some(domain) = domain {
            if let Some(local) = found.remove(&domain_settings_key(domain)) {
                settings = self.merge_value(settings, local, domain);
            }
        }
        settings
    }

    /// Writes the full global settings object.
    pub async fn save(&self, settings: &Settings) -> bool {
        self.write(GLOBAL_SETTINGS_KEY, serde_json::to_value(settings))
            .await
    }

    /// Writes a partial override for one domain.
    pub async fn save_domain_override(&self, domain: &str, patch: &SettingsPatch) -> bool {
        self.write(&domain_settings_key(domain), serde_json::to_value(patch))
            .await
    }

    /// Records a change made from a page on `domain`.
    ///
    /// The patch lands in the domain's override when one exists, otherwise in
    /// the global object. Other domains only ever see global changes.
    pub async fn save_patch(&self, domain: &str, patch: &SettingsPatch) -> bool {
        let key = domain_settings_key(domain);
        let keys = [GLOBAL_SETTINGS_KEY.to_string(), key.clone()];
        let found = match self.storage.get_many(&keys).await {
            Ok(found) => found,
            Err(e) => {
                health().storage.set_unhealthy(e.to_string());
                debug!(domain, error = %e, "Settings read failed, patch not saved");
                return false;
            }
        };

        if let Some(stored) = found.get(&key) {
            let mut local: SettingsPatch = serde_json::from_value(stored.clone()).unwrap_or_default();
            local.merge_from(patch);
            return self.save_domain_override(domain, &local).await;
        }

        let mut global = self.defaults.clone();
        if let Some(value) = found.get(GLOBAL_SETTINGS_KEY) {
            global = self.merge_value(global, value.clone(), GLOBAL_SETTINGS_KEY);
        }
        match global.merged(patch) {
            Ok(next) => self.save(&next).await,
            Err(e) => {
                debug!(domain, error = %e, "Rejected settings patch");
                false
            }
        }
    }

    /// Changes to any settings key.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.storage.on_changed()
    }

    fn merge_value(&self, base: Settings, value: Value, origin: &str) -> Settings {
        let patch: SettingsPatch = match serde_json::from_value(value) {
            Ok(patch) => patch,
            Err(e) => {
                debug!(origin, error = %e, "Ignoring unreadable stored settings");
                return base;
            }
        };
        match base.merged(&patch) {
            Ok(merged) => merged,
            Err(e) => {
                debug!(origin, error = %e, "Ignoring invalid stored settings");
                base
            }
        }
    }

    async fn write(&self, key: &str, value: serde_json::Result<Value>) -> bool {
        let value = match value {
            Ok(value) => value,
            Err(e) => {
                debug!(key, error = %e, "Failed to serialize settings");
                return false;
            }
        };
        match set_one(self.storage.as_ref(), key, value).await {
            Ok(()) => true,
            Err(e) => {
                health().storage.set_unhealthy(e.to_string());
                debug!(key, error = %e, "Settings write failed");
                false
            }
        }
    }
}
