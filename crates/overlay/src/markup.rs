//! Row markup.

use chrono::{TimeZone, Utc};
use monitor_core::{Event, EventGroup};

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `HH:MM:SS.mmm` in UTC.
pub fn format_time(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

pub fn event_row(event: &Event) -> String {
    let index = event
        .data_layer_index
        .map(|i| format!(r#"<span class="dlm-event-index">#{}</span>"#, i))
        .unwrap_or_default();
    format!(
        concat!(
            r#"<div class="dlm-event dlm-category-{category}" data-event-id="{id}">"#,
            r#"<span class="dlm-event-name">{name}</span>"#,
            r#"<span class="dlm-event-time">{time}</span>"#,
            r#"<span class="dlm-event-source">{source}</span>{index}"#,
            r#"<pre class="dlm-event-data">{data}</pre>"#,
            "</div>"
        ),
        category = event.category().as_str(),
        id = escape_html(&event.id),
        name = escape_html(&event.event_name),
        time = format_time(event.timestamp),
        source = escape_html(&event.source),
        index = index,
        data = escape_html(&event.payload_text()),
    )
}

/// Group header plus its visible events, which are omitted when collapsed.
pub fn group_row(group: &EventGroup, events: &[&Event]) -> String {
    let label = group
        .trigger_event
        .as_deref()
        .map(escape_html)
        .unwrap_or_else(|| format_time(group.start_time));
    let mut html = format!(
        concat!(
            r#"<div class="dlm-group{collapsed}" data-group-id="{id}">"#,
            r#"<div class="dlm-group-header">"#,
            r#"<span class="dlm-group-label">{label}</span>"#,
            r#"<span class="dlm-group-count">{count} events</span>"#,
            r#"<span class="dlm-group-duration">{duration}ms</span>"#,
            "</div>"
        ),
        collapsed = if group.collapsed { " dlm-collapsed" } else { "" },
        id = escape_html(&group.id),
        label = label,
        count = events.len(),
        duration = group.duration_ms(),
    );
    if !group.collapsed {
        html.push_str(r#"<div class="dlm-group-events">"#);
        for event in events {
            html.push_str(&event_row(event));
        }
        html.push_str("</div>");
    }
    html.push_str("</div>");
    html
}

pub fn empty_state(filters_active: bool) -> String {
    let text = if filters_active {
        "No events match the current filters"
    } else {
        "Waiting for dataLayer events"
    };
    format!(r#"<div class="dlm-empty">{}</div>"#, text)
}
