//! Storage layer for the dataLayer monitor.
//!
//! The pipeline only talks to an abstract async key-value capability. Two
//! backends are provided: an in-memory map and a JSON file. On top of that
//! sit the per-domain event snapshot store and the settings store, both of
//! which swallow storage failures and answer with safe defaults.

pub mod file;
pub mod kv;
pub mod memory;
pub mod persistence;
pub mod settings_store;

pub use file::FileStorage;
pub use kv::*;
pub use memory::MemoryStorage;
pub use persistence::*;
pub use settings_store::*;
