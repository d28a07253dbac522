//! Core types for the dataLayer monitor pipeline.
//!
//! Holds the leaf components every execution context shares:
//! - Event model and payload naming
//! - Bounded newest-first event buffer
//! - Include/exclude filter engine
//! - Time/trigger grouping engine
//! - Validated pipeline settings

pub mod buffer;
pub mod error;
pub mod events;
pub mod filter;
pub mod grouping;
pub mod limits;
pub mod settings;

pub use buffer::EventBuffer;
pub use error::{Error, Result};
pub use events::*;
pub use filter::*;
pub use grouping::*;
pub use settings::*;
