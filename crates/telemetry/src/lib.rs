//! Internal telemetry for the dataLayer monitor.
//!
//! Structured logging setup, in-process pipeline counters and a health
//! registry for the collaborators the pipeline can lose at runtime.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
