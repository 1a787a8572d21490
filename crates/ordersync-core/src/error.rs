//! Error types for ordersync-core

use thiserror::Error;

use crate::config::ConfigError;
use crate::crypto::DecryptError;
use crate::upstream::UpstreamError;

/// Result type alias using ordersync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ordersync-core operations
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

    /// Configuration error (fatal at startup)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Upstream platform error
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Field decryption error
    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    /// The operation was cancelled by a shutdown signal
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the error came from the persistence layer.
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Database(_) | Self::LibSql(_))
    }
}
