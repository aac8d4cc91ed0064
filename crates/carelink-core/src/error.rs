//! Error types for carelink-core

use thiserror::Error;

/// Result type alias using carelink-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in carelink-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client construction error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote service answered but rejected the request
    #[error("Remote service error: {0}")]
    Remote(String),

    /// The operation cannot be performed without connectivity
    #[error("Internet connection required to {operation}")]
    ConnectionRequired {
        /// Human-readable description of the rejected operation
        operation: &'static str,
    },
}

impl Error {
    /// Whether this error was caused by missing connectivity.
    pub const fn is_connection_required(&self) -> bool {
        matches!(self, Self::ConnectionRequired { .. })
    }
}
