//! Cache/network orchestration
//!
//! The data sources are traits so the orchestrator can be exercised without
//! a database file or a server; [`crate::adapters`] holds the real ones.

pub mod data_source;
pub mod service;

pub use data_source::{CacheDataSource, NetworkDataSource};
pub use service::{SyncEvent, SyncService};
