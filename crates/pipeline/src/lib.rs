//! Composition root of the monitor.
//!
//! A [`PageSession`] owns the buffer, filter engine, grouping engine,
//! renderer and persistence for one tracked page and runs as an actor
//! ([`spawn_session`]). The [`BackgroundCoordinator`] outlives pages, caches
//! their events and fans notifications out to open UI surfaces.

pub mod actor;
pub mod background;
pub mod clipboard;
pub mod session;

pub use actor::*;
pub use background::*;
pub use clipboard::*;
pub use session::*;
