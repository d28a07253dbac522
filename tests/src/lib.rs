//! Shared harness for the end-to-end suites.

pub mod fixtures;
pub mod mocks;
pub mod setup;
