//! Concrete data sources: the SQLite cache and the HTTP archive client.

pub mod http;
pub mod sqlite;

pub use http::HttpDataSource;
pub use sqlite::MessageStore;
