//! Cache-related error types

use thiserror::Error;

/// Boxed error produced by caller-supplied fetchers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Cache operation errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Deserialization error: {message}")]
    Deserialization { message: String },

    /// The durable backing store is missing, read-only or over quota
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("Fetcher for key '{key}' failed: {source}")]
    Fetcher {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Unknown cache strategy: {name}")]
    UnknownStrategy { name: String },

    #[error("Compression error: {message}")]
    Compression { message: String },

    #[error("Invalid configuration value for {field}: {message}")]
    Config { field: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    /// Create a fetcher error for `key`
    pub fn fetcher(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        CacheError::Fetcher {
            key: key.into(),
            source: source.into(),
        }
    }

    /// Create a configuration error
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the backing store should no longer be used
    pub fn is_storage_unavailable(&self) -> bool {
        match self {
            CacheError::StorageUnavailable { .. } => true,
            CacheError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::StorageFull
                    | std::io::ErrorKind::ReadOnlyFilesystem
            ),
            _ => false,
        }
    }
}

/// Re-export commonly used Result type
pub type Result<T> = std::result::Result<T, CacheError>;
