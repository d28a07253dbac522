//! Render targets.

use std::sync::Arc;

use monitor_core::{FilterMode, OverlayPosition, OverlaySize};
use parking_lot::Mutex;
use serde::Serialize;

use crate::modal::ModalView;

/// One row of markup in the list container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRow {
    pub key: String,
    pub html: String,
    /// Transient "new" highlight, toggled in place
    pub highlighted: bool,
}

/// Everything outside the row list: header, footer, geometry, notices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayChrome {
    pub visible: bool,
    pub minimized: bool,
    pub position: OverlayPosition,
    pub size: OverlaySize,
    pub title: String,
    pub page_label: String,
    pub event_filters: Vec<String>,
    pub filter_mode: FilterMode,
    pub search_text: String,
    pub persistence_enabled: bool,
    pub notice: Option<String>,
    pub modal: Option<ModalView>,
}

/// Where the renderer writes. Implementations are the DOM of the overlay.
pub trait RenderSink: Send {
    /// Replaces every row.
    fn replace_rows(&mut self, rows: Vec<RenderedRow>);

    /// Inserts rows above the existing ones, then removes `trim_tail` rows
    /// from the bottom. Existing rows are not touched.
    fn prepend_rows(&mut self, rows: Vec<RenderedRow>, trim_tail: usize);

    fn set_highlight(&mut self, key: &str, highlighted: bool);

    fn update_chrome(&mut self, chrome: &OverlayChrome);
}

/// A mutation applied to a [`DomList`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomOp {
    Replace { rows: usize },
    Prepend { keys: Vec<String>, trim_tail: usize },
    Highlight { key: String, on: bool },
}

/// In-memory list container that records every mutation applied to it.
#[derive(Debug, Clone, Default)]
pub struct DomList {
    rows: Vec<RenderedRow>,
    chrome: Option<OverlayChrome>,
    ops: Vec<DomOp>,
}

impl DomList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[RenderedRow] {
        &self.rows
    }

    pub fn keys(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.key.clone()).collect()
    }

    pub fn chrome(&self) -> Option<&OverlayChrome> {
        self.chrome.as_ref()
    }

    pub fn ops(&self) -> &[DomOp] {
        &self.ops
    }

    /// Returns and forgets the recorded mutations.
    pub fn take_ops(&mut self) -> Vec<DomOp> {
        std::mem::take(&mut self.ops)
    }
}

impl RenderSink for DomList {
    fn replace_rows(&mut self, rows: Vec<RenderedRow>) {
        self.ops.push(DomOp::Replace { rows: rows.len() });
        self.rows = rows;
    }

    fn prepend_rows(&mut self, rows: Vec<RenderedRow>, trim_tail: usize) {
        self.ops.push(DomOp::Prepend {
            keys: rows.iter().map(|r| r.key.clone()).collect(),
            trim_tail,
        });
        let keep = self.rows.len().saturating_sub(trim_tail);
        self.rows.truncate(keep);
        self.rows.splice(0..0, rows);
    }

    fn set_highlight(&mut self, key: &str, highlighted: bool) {
        if let Some(row) = self.rows.iter_mut().find(|r| r.key == key) {
            row.highlighted = highlighted;
            self.ops.push(DomOp::Highlight {
                key: key.to_string(),
                on: highlighted,
            });
        }
    }

    fn update_chrome(&mut self, chrome: &OverlayChrome) {
        self.chrome = Some(chrome.clone());
    }
}

/// Shared sink, so a host can inspect what a session's renderer produced.
impl<S: RenderSink> RenderSink for Arc<Mutex<S>> {
    fn replace_rows(&mut self, rows: Vec<RenderedRow>) {
        self.lock().replace_rows(rows);
    }

    fn prepend_rows(&mut self, rows: Vec<RenderedRow>, trim_tail: usize) {
        self.lock().prepend_rows(rows, trim_tail);
    }

    fn set_highlight(&mut self, key: &str, highlighted: bool) {
        self.lock().set_highlight(key, highlighted);
    }

    fn update_chrome(&mut self, chrome: &OverlayChrome) {
        self.lock().update_chrome(chrome);
    }
}
