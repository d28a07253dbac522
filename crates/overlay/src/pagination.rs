//! Page bookkeeping for the event list.

use monitor_core::limits::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};

/// Zero-based page cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Pagination {
    pub fn new(page_size: usize) -> Self {
        Self {
            page: 0,
            page_size: page_size.max(1),
        }
    }

    /// Always at least one page, even when empty.
    pub fn total_pages(&self, total: usize) -> usize {
        total.div_ceil(self.page_size).max(1)
    }

    /// Pulls the cursor back inside `total` items.
    pub fn clamp(&mut self, total: usize) {
        self.page = self.page.min(self.total_pages(total) - 1);
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
        self.page = 0;
    }

    pub fn next(&mut self, total: usize) -> bool {
        if self.page + 1 < self.total_pages(total) {
            self.page += 1;
            return true;
        }
        false
    }

    pub fn prev(&mut self) -> bool {
        if self.page > 0 {
            self.page -= 1;
            return true;
        }
        false
    }

    pub fn first(&mut self) -> bool {
        std::mem::replace(&mut self.page, 0) != 0
    }

    /// The visible slice of `items`.
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let start = (self.page * self.page_size).min(items.len());
        let end = (start + self.page_size).min(items.len());
        &items[start..end]
    }

    /// "Page 2 of 5" style label.
    pub fn label(&self, total: usize) -> String {
        format!("Page {} of {}", self.page + 1, self.total_pages(total))
    }
}
