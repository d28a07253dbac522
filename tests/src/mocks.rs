//! Mock implementations for testing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use monitor_core::error::StorageErrorCode;
use monitor_core::{Error, Result};
use monitor_storage::{KeyValueStorage, MemoryStorage, StorageArea, StorageChange};
use parking_lot::Mutex;
use pipeline::Clipboard;
use serde_json::Value;
use tokio::sync::broadcast;

/// Storage that keeps data in memory and records every write.
///
/// Implements the same `KeyValueStorage` trait as the file backend, so
/// tests drive the production persistence and settings paths and can
/// switch the backend into a failing state at any point.
#[derive(Clone)]
pub struct MockStorage {
    inner: Arc<MemoryStorage>,
    /// Every successful `set`, in order.
    writes: Arc<Mutex<Vec<(String, Value)>>>,
    /// Simulate failures if set.
    should_fail: Arc<Mutex<bool>>,
}

impl MockStorage {
    pub fn new(area: StorageArea) -> Self {
        Self {
            inner: Arc::new(MemoryStorage::new(area)),
            writes: Arc::new(Mutex::new(Vec::new())),
            should_fail: Arc::new(Mutex::new(false)),
        }
    }

    /// Get all captured writes.
    pub fn captured_writes(&self) -> Vec<(String, Value)> {
        self.writes.lock().clone()
    }

    /// Writes that touched `key`.
    pub fn writes_to(&self, key: &str) -> usize {
        self.writes.lock().iter().filter(|(k, _)| k == key).count()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    /// Set failure mode for testing degradation.
    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock() = fail;
    }

    fn failing(&self) -> bool {
        *self.should_fail.lock()
    }
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::new(StorageArea::Local)
    }
}

#[async_trait]
impl KeyValueStorage for MockStorage {
    fn area(&self) -> StorageArea {
        self.inner.area()
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if self.failing() {
            return Err(Error::storage(StorageErrorCode::ReadFailed, "mock storage failure"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, items: HashMap<String, Value>) -> Result<()> {
        if self.failing() {
            return Err(Error::storage(StorageErrorCode::WriteFailed, "mock storage failure"));
        }
        self.writes
            .lock()
            .extend(items.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.inner.set(items).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if self.failing() {
            return Err(Error::storage(StorageErrorCode::WriteFailed, "mock storage failure"));
        }
        self.inner.remove(key).await
    }

    fn on_changed(&self) -> broadcast::Receiver<StorageChange> {
        self.inner.on_changed()
    }
}

/// Clipboard that records copies and can be switched off.
#[derive(Clone, Default)]
pub struct MockClipboard {
    copies: Arc<Mutex<Vec<String>>>,
    should_fail: Arc<Mutex<bool>>,
}

impl MockClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn copies(&self) -> Vec<String> {
        self.copies.lock().clone()
    }

    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock() = fail;
    }
}

#[async_trait]
impl Clipboard for MockClipboard {
    async fn write_text(&self, text: &str) -> Result<()> {
        if *self.should_fail.lock() {
            return Err(Error::internal("clipboard permission denied"));
        }
        self.copies.lock().push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_storage::set_one;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_storage_captures_writes() {
        let mock = MockStorage::default();
        set_one(&mock, "settings", json!({"maxEvents": 5}))
            .await
            .unwrap();

        assert_eq!(mock.writes_to("settings"), 1);
        assert_eq!(mock.get("settings").await.unwrap(), Some(json!({"maxEvents": 5})));
    }

    #[tokio::test]
    async fn test_mock_storage_failure_mode() {
        let mock = MockStorage::default();
        mock.set_should_fail(true);

        let err = mock.get("settings").await.unwrap_err();
        assert_eq!(err.error_code(), Some("STORE_001"));
        assert!(set_one(&mock, "x", json!(1)).await.is_err());
        assert!(mock.captured_writes().is_empty());
    }

    #[tokio::test]
    async fn test_mock_clipboard_failure_mode() {
        let clipboard = MockClipboard::new();
        clipboard.write_text("a").await.unwrap();
        clipboard.set_should_fail(true);
        assert!(clipboard.write_text("b").await.is_err());
        assert_eq!(clipboard.copies(), vec!["a"]);
    }
}
