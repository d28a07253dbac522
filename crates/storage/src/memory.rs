//! In-memory storage backend.

use std::collections::HashMap;

use async_trait::async_trait;
use monitor_core::Result;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::kv::{KeyValueStorage, StorageArea, StorageChange, CHANGE_CHANNEL_CAPACITY};

/// Process-local key-value map.
pub struct MemoryStorage {
    area: StorageArea,
    items: RwLock<HashMap<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryStorage {
    pub fn new(area: StorageArea) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            area,
            items: RwLock::new(HashMap::new()),
            changes,
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn publish(&self, key: String, old_value: Option<Value>, new_value: Option<Value>) {
        if old_value == new_value {
            return;
        }
        // No subscribers is fine.
        let _ = self.changes.send(StorageChange {
            area: self.area,
            key,
            old_value,
            new_value,
        });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(StorageArea::Local)
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    fn area(&self) -> StorageArea {
        self.area
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.items.read().get(key).cloned())
    }

    async fn set(&self, items: HashMap<String, Value>) -> Result<()> {
        let mut changed = Vec::with_capacity(items.len());
        {
            let mut map = self.items.write();
            for (key, value) in items {
                let old = map.insert(key.clone(), value.clone());
                changed.push((key, old, Some(value)));
            }
        }
        for (key, old, new) in changed {
            self.publish(key, old, new);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let old = self.items.write().remove(key);
        if old.is_some() {
            self.publish(key.to_string(), old, None);
        }
        Ok(())
    }

    fn on_changed(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
