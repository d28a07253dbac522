//! Generic async key-value storage capability.

use std::collections::HashMap;

use async_trait::async_trait;
use monitor_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of the change notification channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Which storage area a backend represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    /// Machine-local data such as event snapshots
    Local,
    /// Settings that follow the user
    Sync,
}

/// A single key change observed by `on_changed` subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageChange {
    pub area: StorageArea,
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Async key-value storage.
///
/// Implementations may fail at any time (I/O errors, quota). Callers in the
/// pipeline treat every error as "storage unavailable" and fall back.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    /// Area this backend serves; stamped on every change notification.
    fn area(&self) -> StorageArea;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Reads several keys at once. Missing keys are absent from the map.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn set(&self, items: HashMap<String, Value>) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Subscribes to change notifications for this area.
    fn on_changed(&self) -> broadcast::Receiver<StorageChange>;
}

/// Convenience for writing a single key.
pub async fn set_one(storage: &dyn KeyValueStorage, key: &str, value: Value) -> Result<()> {
    let mut items = HashMap::with_capacity(1);
    items.insert(key.to_string(), value);
    storage.set(items).await
}
