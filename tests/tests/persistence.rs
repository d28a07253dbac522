//! Cross-reload persistence and storage failure tests.

use std::sync::Arc;

use bridge::Message;
use chrono::Utc;
use integration_tests::fixtures::{self, push_at, DOMAIN, PAGE_URL};
use integration_tests::setup::TestContext;
use monitor_core::{Event, Settings};
use monitor_storage::{snapshot_key, FileStorage, KeyValueStorage, PersistenceStore, StorageArea};

fn persisting() -> Settings {
    Settings {
        persist_events: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_events_survive_reload() {
    let ctx = TestContext::with_settings(persisting()).await;
    let mut tab = ctx.open_tab(1).await;
    tab.push(fixtures::gtm_js());
    tab.push(fixtures::page_view());
    tab.wait_for_events(2).await;
    tab.close().await;

    let reloaded = ctx.open_tab(1).await;
    let snapshot = reloaded.snapshot().await;
    let names: Vec<_> = snapshot.events.iter().map(|e| e.event_name.as_str()).collect();
    assert_eq!(names, vec!["page_view", "gtm.js"]);
    assert!(snapshot
        .events
        .iter()
        .all(|e| e.source == "dataLayer (persisted)"));

    reloaded.close().await;
}

#[tokio::test]
async fn test_repeated_reloads_tag_once() {
    let ctx = TestContext::with_settings(persisting()).await;
    let mut tab = ctx.open_tab(1).await;
    tab.push(fixtures::purchase(12.0));
    tab.wait_for_events(1).await;
    tab.close().await;

    for reload in 0..2 {
        let mut tab = ctx.open_tab(1).await;
        tab.push(fixtures::custom(reload));
        tab.wait_for_events(reload + 2).await;
        tab.close().await;
    }

    let stored = ctx.local.get(&snapshot_key(DOMAIN)).await.unwrap().unwrap();
    let events: Vec<Event> = serde_json::from_value(stored["events"].clone()).unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.source == "dataLayer"));
    assert!(stored["lastUpdated"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_age_eviction_on_load() {
    let ctx = TestContext::new().await;
    let now = Utc::now().timestamp_millis();
    let fresh = push_at(fixtures::custom(1), now - 10_000).into_event();
    let stale = push_at(fixtures::custom(2), now - 100_000).into_event();
    assert!(
        ctx.services
            .persistence
            .save(DOMAIN, &[fresh.clone(), stale], 100)
            .await
    );

    let loaded = ctx.services.persistence.load_at(DOMAIN, 50_000, now).await;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, fresh.id);

    let unlimited = ctx.services.persistence.load_at(DOMAIN, 0, now).await;
    assert_eq!(unlimited.len(), 2);
}

#[tokio::test]
async fn test_snapshots_are_per_domain() {
    let ctx = TestContext::with_settings(persisting()).await;
    let mut tab = ctx.open_tab(1).await;
    tab.push(fixtures::gtm_js());
    tab.wait_for_events(1).await;
    tab.close().await;

    let other = ctx.open_tab_at(2, "https://blog.example.org/post").await;
    assert!(other.snapshot().await.events.is_empty());
    other.close().await;

    let same = ctx.open_tab_at(3, PAGE_URL).await;
    assert_eq!(same.snapshot().await.events.len(), 1);
    same.close().await;
}

#[tokio::test]
async fn test_persistence_disabled_writes_nothing() {
    let ctx = TestContext::new().await;
    let mut tab = ctx.open_tab(1).await;
    tab.push(fixtures::gtm_js());
    tab.wait_for_events(1).await;
    tab.close().await;

    assert_eq!(ctx.local.writes_to(&snapshot_key(DOMAIN)), 0);
}

#[tokio::test]
async fn test_clear_events_removes_snapshot() {
    let ctx = TestContext::with_settings(persisting()).await;
    let mut tab = ctx.open_tab(1).await;
    tab.push(fixtures::gtm_js());
    tab.wait_for_events(1).await;

    let resp = ctx.request(Message::ClearEvents, Some(1)).await;
    assert!(resp.success);
    let snapshot = tab.wait_until(|s| s.events.is_empty()).await;
    assert!(snapshot.groups.is_empty());
    tab.close().await;

    assert!(ctx.local.get(&snapshot_key(DOMAIN)).await.unwrap().is_none());
    assert!(ctx.coordinator.coordinator.cached_events(1).is_empty());
}

#[tokio::test]
async fn test_capture_survives_storage_failure() {
    let ctx = TestContext::with_settings(persisting()).await;
    ctx.set_storage_failure(true);

    let mut tab = ctx.open_tab(1).await;
    assert!(tab.snapshot().await.settings.persist_events);
    tab.push(fixtures::gtm_js());
    tab.push(fixtures::purchase(5.0));
    let snapshot = tab.wait_for_events(2).await;
    assert_eq!(snapshot.events.len(), 2);
    tab.close().await;

    assert!(ctx.local.captured_writes().is_empty());

    ctx.set_storage_failure(false);
    let reloaded = ctx.open_tab(1).await;
    assert!(reloaded.snapshot().await.events.is_empty());
    reloaded.close().await;
}

#[tokio::test]
async fn test_snapshot_survives_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.json");
    let event = push_at(fixtures::purchase(42.0), Utc::now().timestamp_millis()).into_event();

    {
        let storage = Arc::new(FileStorage::open(&path, StorageArea::Local).await.unwrap());
        let store = PersistenceStore::new(storage);
        assert!(store.save(DOMAIN, &[event.clone()], 100).await);
    }

    let storage = Arc::new(FileStorage::open(&path, StorageArea::Local).await.unwrap());
    let loaded = PersistenceStore::new(storage).load(DOMAIN, 0).await;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, event.id);
    assert_eq!(loaded[0].event_name, "purchase");
    assert_eq!(loaded[0].source, "dataLayer (persisted)");
}
