//! Timing constants and size bounds for the monitor pipeline.
//!
//! The `#[validate]` derive macro requires literal values in attributes,
//! so the settings bounds are duplicated in `settings.rs`. Keep both in sync
//! when modifying.

// === Buffer Limits ===

/// Default number of events kept in a session buffer.
pub const DEFAULT_MAX_EVENTS: usize = 500;

/// Smallest allowed buffer size.
pub const MIN_MAX_EVENTS: usize = 1;

/// Largest allowed buffer size.
///
/// The buffer does linear id lookups, so it is kept to a few thousand entries.
pub const MAX_MAX_EVENTS: usize = 5000;

// === Grouping ===

/// Default time window that keeps consecutive events in one group (ms).
pub const DEFAULT_GROUP_TIME_WINDOW_MS: i64 = 1000;

/// Largest allowed grouping window (10 minutes).
pub const MAX_GROUP_TIME_WINDOW_MS: i64 = 600_000;

// === Overlay Timing ===

/// Minimum interval between two paints of the overlay (one animation frame).
pub const RENDER_DEBOUNCE_MS: u64 = 16;

/// How long a freshly inserted row keeps its highlight.
pub const NEW_EVENT_HIGHLIGHT_MS: u64 = 3000;

/// Delay before the overlay minimizes after every group was collapsed.
pub const MINIMIZE_AFTER_COLLAPSE_MS: u64 = 300;

/// Lifetime of a transient user-facing notice.
pub const NOTICE_LIFETIME_MS: u64 = 2500;

/// Default rows per overlay page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

// === Persistence ===

/// Debounce applied to snapshot writes after the buffer changes.
pub const PERSIST_DEBOUNCE_MS: u64 = 500;

/// Marker appended to `source` for events restored from a snapshot.
pub const PERSISTED_MARKER: &str = " (persisted)";
