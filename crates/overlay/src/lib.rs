//! Overlay presentation layer.
//!
//! The renderer keeps a live event list in sync with a bursty event stream.
//! Updates that only prepend new rows to what is already on screen are
//! applied as insertions; everything else rebuilds the visible page. The
//! decision lives in [`reconcile::diff`], a pure function.

pub mod geometry;
pub mod markup;
pub mod modal;
pub mod pagination;
pub mod reconcile;
pub mod renderer;
pub mod schedule;
pub mod sink;

pub use geometry::*;
pub use modal::FilterModal;
pub use pagination::Pagination;
pub use reconcile::{diff, RenderContext, RenderMode, RenderPlan};
pub use renderer::*;
pub use schedule::{RenderScheduler, ScheduleDecision};
pub use sink::*;
