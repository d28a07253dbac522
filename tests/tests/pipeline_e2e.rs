//! End-to-end tests for capture, grouping, filtering and rendering.

use bridge::Message;
use integration_tests::fixtures::{self, push_at};
use integration_tests::setup::TestContext;
use monitor_core::{GroupingMode, Settings, SettingsPatch};
use overlay::DomOp;
use pipeline::UserAction;

fn trigger_settings(triggers: &[&str]) -> Settings {
    Settings {
        grouping_enabled: true,
        grouping_mode: GroupingMode::Trigger,
        grouping_trigger_events: triggers.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    }
}

/// gtm.js at t=0 then page_view at t=10 with only gtm.js as trigger.
#[tokio::test]
async fn test_trigger_grouping_scenario() {
    let ctx = TestContext::with_settings(trigger_settings(&["gtm.js"])).await;
    let tab = ctx.open_tab(1).await;

    tab.handle.capture(push_at(fixtures::gtm_js(), 0));
    tab.handle.capture(push_at(fixtures::page_view(), 10));

    let snapshot = tab.wait_for_events(2).await;
    assert_eq!(snapshot.groups.len(), 1);
    let group = &snapshot.groups[0];
    assert_eq!(group.trigger_event.as_deref(), Some("gtm.js"));
    assert_eq!(group.events.len(), 2);
    assert_eq!(group.start_time, 0);
    assert_eq!(group.end_time, 10);

    tab.close().await;
}

/// With page_view configured as a trigger too, it opens its own group.
#[tokio::test]
async fn test_every_trigger_opens_a_group() {
    let ctx = TestContext::with_settings(trigger_settings(&["gtm.js", "page_view"])).await;
    let tab = ctx.open_tab(1).await;

    tab.handle.capture(push_at(fixtures::gtm_js(), 0));
    tab.handle.capture(push_at(fixtures::page_view(), 10));
    tab.handle.capture(push_at(fixtures::purchase(3.0), 20));

    let snapshot = tab.wait_for_events(3).await;
    let triggers: Vec<_> = snapshot
        .groups
        .iter()
        .map(|g| g.trigger_event.as_deref())
        .collect();
    assert_eq!(triggers, vec![Some("page_view"), Some("gtm.js")]);
    assert_eq!(snapshot.groups[0].events.len(), 2);
    assert!(snapshot
        .events
        .iter()
        .all(|e| e.group_id.is_some()));

    tab.close().await;
}

#[tokio::test]
async fn test_page_pushes_reach_popup() {
    let mut ctx = TestContext::new().await;
    let mut tab = ctx.open_tab(4).await;

    tab.push(fixtures::purchase(42.0));

    let envelope = ctx
        .wait_for_popup(|e| matches!(e.message, Message::EventAdded(_)))
        .await;
    assert_eq!(envelope.tab_id, Some(4));
    match envelope.message {
        Message::EventAdded(event) => {
            assert_eq!(event.event_name, "purchase");
            assert_eq!(event.source, "dataLayer");
            assert_eq!(event.data_layer_index, Some(0));
        }
        other => panic!("unexpected {other:?}"),
    }

    tab.close().await;
}

#[tokio::test]
async fn test_buffer_is_bounded() {
    let ctx = TestContext::with_settings(Settings {
        max_events: 3,
        ..Default::default()
    })
    .await;
    let mut tab = ctx.open_tab(1).await;

    for i in 0..5 {
        tab.push(fixtures::custom(i));
    }

    let snapshot = tab
        .wait_until(|s| s.events.first().map(|e| e.event_name.as_str()) == Some("custom_4"))
        .await;
    let names: Vec<_> = snapshot.events.iter().map(|e| e.event_name.as_str()).collect();
    assert_eq!(names, vec!["custom_4", "custom_3", "custom_2"]);

    tab.close().await;
}

#[tokio::test]
async fn test_gtag_arguments_are_named() {
    let ctx = TestContext::new().await;
    let mut tab = ctx.open_tab(1).await;

    tab.push(fixtures::gtag_event("sign_up"));

    let snapshot = tab.wait_for_events(1).await;
    assert_eq!(snapshot.events[0].event_name, "sign_up");

    tab.close().await;
}

async fn wait_for_rows(tab: &integration_tests::setup::TestTab, rows: usize) {
    for _ in 0..400 {
        if tab.sink.lock().keys().len() == rows {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("overlay never showed {rows} rows");
}

#[tokio::test]
async fn test_new_event_is_prepended_without_rebuild() {
    let ctx = TestContext::new().await;
    let mut tab = ctx.open_tab(1).await;

    for i in 0..3 {
        tab.push(fixtures::custom(i));
    }
    wait_for_rows(&tab, 3).await;
    tab.sink.lock().take_ops();

    tab.push(fixtures::custom(3));
    wait_for_rows(&tab, 4).await;

    let ops = tab.sink.lock().take_ops();
    assert!(!ops.iter().any(|op| matches!(op, DomOp::Replace { .. })));
    assert!(ops
        .iter()
        .any(|op| matches!(op, DomOp::Prepend { keys, trim_tail: 0 } if keys.len() == 1)));

    let snapshot = tab.snapshot().await;
    assert_eq!(tab.sink.lock().keys()[0], snapshot.events[0].id);

    tab.close().await;
}

#[tokio::test]
async fn test_filter_mode_change_rebuilds() {
    let ctx = TestContext::new().await;
    let mut tab = ctx.open_tab(1).await;

    for i in 0..3 {
        tab.push(fixtures::custom(i));
    }
    wait_for_rows(&tab, 3).await;
    tab.sink.lock().take_ops();

    let resp = ctx
        .request(
            Message::UpdateSettings(SettingsPatch {
                event_filters: Some(vec!["custom_1".into()]),
                filter_mode: Some(monitor_core::FilterMode::Include),
                ..Default::default()
            }),
            Some(1),
        )
        .await;
    assert!(resp.success);

    wait_for_rows(&tab, 1).await;
    let ops = tab.sink.lock().take_ops();
    assert!(ops.iter().any(|op| matches!(op, DomOp::Replace { rows: 1 })));

    tab.close().await;
}

#[tokio::test]
async fn test_copy_event_to_clipboard() {
    let ctx = TestContext::new().await;
    let mut tab = ctx.open_tab(1).await;
    tab.push(fixtures::purchase(9.5));
    let snapshot = tab.wait_for_events(1).await;
    let id = snapshot.events[0].id.clone();

    tab.handle.act(UserAction::CopyEvent(id.clone()));
    let snapshot = tab.wait_until(|s| s.notice.is_some()).await;
    assert_eq!(snapshot.notice.as_deref(), Some("Copied to clipboard"));
    assert!(ctx.clipboard.copies()[0].contains("T-1001"));

    ctx.clipboard.set_should_fail(true);
    tab.handle.act(UserAction::CopyEvent(id));
    let snapshot = tab
        .wait_until(|s| s.notice.as_deref() == Some("Failed to copy event"))
        .await;
    assert_eq!(snapshot.events.len(), 1);

    tab.close().await;
}

#[tokio::test]
async fn test_search_text_narrows_overlay() {
    let ctx = TestContext::new().await;
    let mut tab = ctx.open_tab(1).await;
    tab.push(fixtures::page_view());
    tab.push(fixtures::purchase(1.0));
    wait_for_rows(&tab, 2).await;

    tab.handle.act(UserAction::SetSearchText("T-1001".into()));
    wait_for_rows(&tab, 1).await;
    let snapshot = tab.snapshot().await;
    assert_eq!(snapshot.overlay.visible_count, 1);
    assert_eq!(snapshot.filter.search_text, "T-1001");

    tab.close().await;
}

/// Arrays added to `dataLayerNames` at runtime are hooked on the live page.
#[tokio::test]
async fn test_added_data_layer_is_captured() {
    let ctx = TestContext::new().await;
    let mut tab = ctx.open_tab(1).await;

    tab.push_to("appLayer", fixtures::custom(1));
    let resp = ctx
        .request(
            Message::UpdateSettings(SettingsPatch {
                data_layer_names: Some(vec!["dataLayer".into(), "appLayer".into()]),
                ..Default::default()
            }),
            Some(1),
        )
        .await;
    assert!(resp.success);

    tab.push_to("appLayer", fixtures::custom(2));
    let snapshot = tab.wait_for_events(2).await;
    let captured: Vec<_> = snapshot
        .events
        .iter()
        .map(|e| (e.event_name.as_str(), e.source.as_str()))
        .collect();
    assert_eq!(captured, vec![("custom_2", "appLayer"), ("custom_1", "appLayer")]);
    assert!(tab.page.is_hooked("appLayer"));

    tab.close().await;
}
