//! Error types for the threading and sync engine
//!
//! Everything below the sync orchestrator returns `Result<T>`. The
//! orchestrator itself never lets these escape: network and cache failures
//! degrade to whatever the cache can still answer.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CharterError {
    /// Malformed or incomplete network record. The upsert it belonged to
    /// wrote nothing.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Cache write error: {0}")]
    CacheWrite(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Message not found: {0}")]
    NotFound(String),
}

// Serialize as a plain string so callers can hand errors to a UI layer as-is.
impl Serialize for CharterError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<r2d2::Error> for CharterError {
    fn from(e: r2d2::Error) -> Self {
        CharterError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for CharterError {
    fn from(e: rusqlite::Error) -> Self {
        CharterError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for CharterError {
    fn from(e: reqwest::Error) -> Self {
        CharterError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for CharterError {
    fn from(e: serde_json::Error) -> Self {
        CharterError::Parse(e.to_string())
    }
}

impl From<toml::de::Error> for CharterError {
    fn from(e: toml::de::Error) -> Self {
        CharterError::Config(e.to_string())
    }
}

impl From<std::io::Error> for CharterError {
    fn from(e: std::io::Error) -> Self {
        CharterError::Io(e.to_string())
    }
}

/// Result type alias using CharterError
pub type Result<T> = std::result::Result<T, CharterError>;
