//! Error types for the cluster cache client

use thiserror::Error;

/// Result type alias for cache client operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Cache client error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Invalid construction parameters, raised before any connection attempt
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The circuit breaker is open; the call never reached the transport
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// Transport or store failure (timeout, refused connection, unreachable node)
    #[error("Remote error: {0}")]
    Remote(String),

    /// Authentication tag mismatch or malformed envelope on read
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// A value could not be sealed on write
    #[error("Encryption error: {0}")]
    Encryption(String),
}

impl CacheError {
    /// Whether retrying later may succeed without changing the request
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CircuitOpen | Self::Remote(_))
    }
}

#[cfg(feature = "redis-cluster")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Remote(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for CacheError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Remote("command timed out".to_string())
    }
}
