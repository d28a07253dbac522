//! JSON file storage backend.
//!
//! The whole map lives in one JSON object on disk. Writes go to a sibling
//! temp file which is then renamed over the original.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use monitor_core::error::StorageErrorCode;
use monitor_core::{Error, Result};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::kv::{KeyValueStorage, StorageArea, StorageChange, CHANGE_CHANNEL_CAPACITY};

pub struct FileStorage {
    area: StorageArea,
    path: PathBuf,
    items: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
}

impl FileStorage {
    /// Opens the store, reading existing contents. A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>, area: StorageArea) -> Result<Self> {
        let path = path.into();
        let items = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::storage(
                    StorageErrorCode::ReadFailed,
                    format!("{}: {}", path.display(), e),
                )
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(Error::storage(
                    StorageErrorCode::ReadFailed,
                    format!("{}: {}", path.display(), e),
                ))
            }
        };

        debug!(path = %path.display(), keys = items.len(), "Opened file storage");

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            area,
            path,
            items: Mutex::new(items),
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, items: &HashMap<String, Value>) -> Result<()> {
        let write_failed =
            |e: std::io::Error| Error::storage(StorageErrorCode::WriteFailed, e.to_string());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
            }
        }

        let bytes = serde_json::to_vec_pretty(items)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(write_failed)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(write_failed)?;
        Ok(())
    }

    fn publish(&self, key: String, old_value: Option<Value>, new_value: Option<Value>) {
        if old_value == new_value {
            return;
        }
        let _ = self.changes.send(StorageChange {
            area: self.area,
            key,
            old_value,
            new_value,
        });
    }
}

#[async_trait]
impl KeyValueStorage for FileStorage {
    fn area(&self) -> StorageArea {
        self.area
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        let items = self.items.lock().await;
        Ok(keys
            .iter()
            .filter_map(|k| items.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set(&self, updates: HashMap<String, Value>) -> Result<()> {
        let mut items = self.items.lock().await;
        let mut next = items.clone();
        let mut changed = Vec::with_capacity(updates.len());
        for (key, value) in updates {
            let old = next.insert(key.clone(), value.clone());
            changed.push((key, old, Some(value)));
        }

        // Memory only moves forward once the file write succeeded.
        self.flush(&next).await?;
        *items = next;
        drop(items);

        for (key, old, new) in changed {
            self.publish(key, old, new);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut items = self.items.lock().await;
        if !items.contains_key(key) {
            return Ok(());
        }
        let mut next = items.clone();
        let old = next.remove(key);
        self.flush(&next).await?;
        *items = next;
        drop(items);

        self.publish(key.to_string(), old, None);
        Ok(())
    }

    fn on_changed(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
