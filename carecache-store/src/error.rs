//! Error types for cache store operations.

use thiserror::Error;

/// Result type for cache store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Cache store errors.
///
/// These surface only through the `try_*` methods of
/// [`CacheStore`](crate::CacheStore); the regular methods log them and fail
/// open.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Backend unreachable
    #[error("Connection error: {0}")]
    Connection(String),

    /// Value could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored payload is corrupt or of an incompatible shape
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Gzip or base64 failure
    #[error("Compression error: {0}")]
    Compression(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,

    /// Generic error
    #[error("Cache error: {0}")]
    Other(String),

    /// A multi-step delete failed after some keys were already removed
    #[error("{source} ({deleted} keys deleted before the failure)")]
    Partial {
        deleted: u64,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Whether the backend itself was unreachable.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout => true,
            Self::Partial { source, .. } => source.is_connection_error(),
            #[cfg(feature = "redis")]
            Self::Redis(e) => e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout(),
            _ => false,
        }
    }

    /// Keys a failed delete had already removed.
    pub fn deleted_before_failure(&self) -> u64 {
        match self {
            Self::Partial { deleted, .. } => *deleted,
            _ => 0,
        }
    }

    pub(crate) fn after_deleting(self, deleted: u64) -> Self {
        if deleted == 0 {
            self
        } else {
            Self::Partial {
                deleted,
                source: Box::new(self),
            }
        }
    }

    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_connection_error()
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Compression(err.to_string())
    }
}

impl From<base64::DecodeError> for StoreError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Compression(err.to_string())
    }
}
