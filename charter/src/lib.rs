//! Charter sync - mailing list threading and cache engine
//!
//! Reads Swift mailing list archives through a local SQLite cache that is
//! refreshed from the archive API on demand.
//!
//! ## Module Organization
//!
//! - `types/`: Messages as cached and as received from the network
//! - `services/`: Thread queries, thread assembly, display formatting
//! - `adapters/`: SQLite message store and HTTP archive client
//! - `sync/`: Cache/network orchestration
//! - `config/`: Configuration management

pub mod adapters;
pub mod config;
pub mod error;
pub mod services;
pub mod sync;
pub mod types;

pub use adapters::{HttpDataSource, MessageStore};
pub use error::{CharterError, Result};
pub use services::{assemble_thread, EmailFormatter, ThreadEntry, ThreadQuery};
pub use sync::{CacheDataSource, NetworkDataSource, SyncEvent, SyncService};
pub use types::{MailingList, Message, NetworkMessage};

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` overrides the defaults.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("charter_sync_lib=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
