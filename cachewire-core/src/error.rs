//! Error types for cache operations

use std::io;
use thiserror::Error;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Comprehensive error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or unparseable reply
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server returned an error reply
    #[error("Server error: {0}")]
    Server(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Type conversion error
    #[error("Type conversion error: {0}")]
    Type(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Value could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Payload could not be compressed or decompressed
    #[error("Compression error: {0}")]
    Compression(String),

    /// A cache operation failed; carries the operation name and key
    #[error("Cache {operation} failed for key \"{key}\": {source}")]
    Operation {
        /// Operation name (`get`, `set`, ...)
        operation: &'static str,
        /// User key the operation was applied to
        key: String,
        /// Underlying cause
        #[source]
        source: Box<CacheError>,
    },
}

impl CacheError {
    /// Wrap an error with the operation and key it happened under
    pub fn operation(operation: &'static str, key: impl Into<String>, source: Self) -> Self {
        Self::Operation {
            operation,
            key: key.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error means the transport is unusable
    #[must_use]
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Io(_) | Self::Connection(_) | Self::Timeout | Self::Protocol(_) => true,
            Self::Operation { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    /// The innermost error, skipping operation context
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }
}
