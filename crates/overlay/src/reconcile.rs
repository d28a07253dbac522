//! Pure reconciliation between the rendered rows and the next view.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use monitor_core::FilterMode;

/// Everything that, when changed, invalidates the rendered rows as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderContext {
    pub page: usize,
    pub search_text: String,
    pub event_filters: Vec<String>,
    pub filter_mode: FilterMode,
    pub persistence_enabled: bool,
    pub grouped: bool,
}

impl RenderContext {
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// How the next view gets onto the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Rows are already correct
    Unchanged,
    /// Insert the plan's items above the existing rows, then drop
    /// `trim_tail` rows from the bottom
    Prepend { trim_tail: usize },
    /// Replace every row with the plan's items
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPlan<T> {
    pub mode: RenderMode,
    /// New items for `Prepend`, every item for `Full`, empty otherwise
    pub items: Vec<T>,
}

/// Compares the keys on screen with the next items.
///
/// The fast path applies when `next` is some brand-new items followed by a
/// prefix of `prev_keys`. A shorter prefix means rows fell off the bottom of
/// the page, which is still an insertion plus a tail trim.
pub fn diff<T, F>(prev_keys: &[String], next: &[T], key_of: F) -> RenderPlan<T>
where
    T: Clone,
    F: Fn(&T) -> &str,
{
    let full = || RenderPlan {
        mode: RenderMode::Full,
        items: next.to_vec(),
    };

    let Some(first_prev) = prev_keys.first() else {
        return full();
    };
    let Some(inserted) = next.iter().position(|item| key_of(item) == first_prev) else {
        return full();
    };

    let kept = next.len() - inserted;
    if kept > prev_keys.len() {
        return full();
    }
    let prefix_matches = next[inserted..]
        .iter()
        .zip(prev_keys)
        .all(|(item, key)| key_of(item) == key);
    if !prefix_matches {
        return full();
    }

    let trim_tail = prev_keys.len() - kept;
    if inserted == 0 && trim_tail == 0 {
        return RenderPlan {
            mode: RenderMode::Unchanged,
            items: Vec::new(),
        };
    }
    RenderPlan {
        mode: RenderMode::Prepend { trim_tail },
        items: next[..inserted].to_vec(),
    }
}
