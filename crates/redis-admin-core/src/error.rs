//! Error types for the Redis admin

use thiserror::Error;

/// Core error type for Redis admin operations
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported lookup: {0}")]
    Lookup(String),

    /// The server answered with an error reply, or with a reply that does not
    /// fit the expected shape.
    #[error("Response error: {0}")]
    Response(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("get() returned {count} keys matching {pattern:?}, expected one")]
    MultipleObjectsReturned { pattern: String, count: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl AdminError {
    /// Whether this error came from a protocol-level reply rather than the
    /// transport. Value fetches that fail this way are retried key by key.
    pub fn is_response_error(&self) -> bool {
        matches!(self, AdminError::Response(_))
    }
}

/// Result type alias for Redis admin operations
pub type Result<T> = std::result::Result<T, AdminError>;
