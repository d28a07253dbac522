//! Cross-context messaging tests.

use bridge::{ContextId, Message};
use integration_tests::fixtures::{self, DOMAIN};
use integration_tests::setup::TestContext;
use monitor_core::{Event, Settings, SettingsPatch};
use monitor_storage::{KeyValueStorage, GLOBAL_SETTINGS_KEY};
use overlay::OverlayState;
use serde_json::json;

#[tokio::test]
async fn test_get_events_through_background() {
    let ctx = TestContext::new().await;
    let mut tab = ctx.open_tab(5).await;
    tab.push(fixtures::gtm_js());
    tab.push(fixtures::page_view());
    tab.wait_for_events(2).await;

    let resp = ctx.request(Message::GetEvents, Some(5)).await;
    let events: Vec<Event> = resp.data_as().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_name, "page_view");

    tab.close().await;
}

#[tokio::test]
async fn test_closed_tab_is_served_from_cache() {
    let mut ctx = TestContext::new().await;
    let mut tab = ctx.open_tab(6).await;
    tab.push(fixtures::purchase(1.0));
    ctx.wait_for_popup(|e| matches!(e.message, Message::EventAdded(_)))
        .await;
    tab.close().await;

    let resp = ctx.request(Message::GetEvents, Some(6)).await;
    let events: Vec<Event> = resp.data_as().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_name, "purchase");
}

#[tokio::test]
async fn test_unknown_and_malformed_messages() {
    let ctx = TestContext::new().await;

    let resp = ctx.send_raw(json!({"type": "OPEN_SIDE_PANEL"})).await.unwrap();
    assert!(!resp.success);
    assert!(resp.is_unhandled());

    assert!(ctx.send_raw(json!("not an envelope")).await.is_none());
    assert!(ctx.send_raw(json!({"payload": {}})).await.is_none());

    let resp = ctx.request(Message::Ping, None).await;
    assert_eq!(resp.data, Some(json!({"pong": true})));
}

#[tokio::test]
async fn test_tab_request_without_listener_is_silent_success() {
    let ctx = TestContext::new().await;
    let resp = ctx
        .request(Message::ToggleOverlay { enabled: Some(false) }, Some(99))
        .await;
    assert!(resp.success);
    assert!(resp.data.is_none());
}

#[tokio::test]
async fn test_update_settings_reaches_tab() {
    let ctx = TestContext::new().await;
    let tab = ctx.open_tab(2).await;

    let resp = ctx
        .request(
            Message::UpdateSettings(SettingsPatch {
                grouping_enabled: Some(true),
                ..Default::default()
            }),
            Some(2),
        )
        .await;
    assert!(resp.success);
    let settings: Settings = resp.data_as().unwrap();
    assert!(settings.grouping_enabled);

    let snapshot = tab.snapshot().await;
    assert!(snapshot.settings.grouping_enabled);
    let saved = ctx.sync.get(GLOBAL_SETTINGS_KEY).await.unwrap().unwrap();
    assert_eq!(saved["groupingEnabled"], true);

    tab.close().await;
}

#[tokio::test]
async fn test_domain_override_stays_with_its_domain() {
    let ctx = TestContext::new().await;
    let local = SettingsPatch {
        max_events: Some(20),
        ..Default::default()
    };
    assert!(ctx.services.settings.save_domain_override(DOMAIN, &local).await);

    let shop = ctx.open_tab(1).await;
    let blog = ctx.open_tab_at(2, "https://blog.example.org/post").await;

    let resp = ctx
        .request(
            Message::UpdateSettings(SettingsPatch {
                grouping_enabled: Some(true),
                ..Default::default()
            }),
            Some(1),
        )
        .await;
    assert!(resp.success);
    let snapshot = shop.wait_until(|s| s.settings.grouping_enabled).await;
    assert_eq!(snapshot.settings.max_events, 20);

    let other = blog.snapshot().await.settings;
    assert_eq!(other.max_events, Settings::default().max_events);
    assert!(!other.grouping_enabled);
    let global = ctx.services.settings.load(Some("blog.example.org")).await;
    assert_eq!(global.max_events, Settings::default().max_events);
    assert!(!global.grouping_enabled);

    shop.close().await;
    blog.close().await;
}

#[tokio::test]
async fn test_invalid_settings_are_rejected() {
    let ctx = TestContext::new().await;
    let tab = ctx.open_tab(2).await;

    let resp = ctx
        .request(
            Message::UpdateSettings(SettingsPatch {
                max_events: Some(0),
                ..Default::default()
            }),
            Some(2),
        )
        .await;
    assert!(!resp.success);
    assert_eq!(resp.code.as_deref(), Some("CFG_001"));
    assert_eq!(
        tab.snapshot().await.settings.max_events,
        Settings::default().max_events
    );

    tab.close().await;
}

#[tokio::test]
async fn test_global_settings_propagate_to_open_tabs() {
    let mut ctx = TestContext::new().await;
    let tab = ctx.open_tab(3).await;

    let resp = ctx
        .request(
            Message::UpdateSettings(SettingsPatch {
                max_events: Some(2),
                ..Default::default()
            }),
            None,
        )
        .await;
    assert!(resp.success);

    let envelope = ctx
        .wait_for_popup(|e| matches!(e.message, Message::SettingsUpdated(_)))
        .await;
    match envelope.message {
        Message::SettingsUpdated(settings) => assert_eq!(settings.max_events, 2),
        other => panic!("unexpected {other:?}"),
    }
    tab.wait_until(|s| s.settings.max_events == 2).await;

    tab.close().await;
}

#[tokio::test]
async fn test_toggle_overlay_and_state() {
    let ctx = TestContext::new().await;
    let tab = ctx.open_tab(8).await;

    let resp = ctx
        .request(Message::ToggleOverlay { enabled: None }, Some(8))
        .await;
    assert_eq!(resp.data, Some(json!({"enabled": false})));

    let resp = ctx.request(Message::GetOverlayState, Some(8)).await;
    let state: OverlayState = resp.data_as().unwrap();
    assert!(!state.enabled);
    let mut hidden = false;
    for _ in 0..400 {
        hidden = tab.sink.lock().chrome().is_some_and(|c| !c.visible);
        if hidden {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(hidden);

    tab.close().await;
}

#[tokio::test]
async fn test_tabs_can_message_background_directly() {
    let ctx = TestContext::new().await;
    let resp = ctx
        .bus
        .send(&ContextId::Tab(1), &ContextId::Background, json!({"type": "PING"}))
        .await
        .unwrap();
    assert!(resp.success);
}
