//! Error types for the coin cache.

use thiserror::Error;

/// Top-level service error, returned by the read-through accessor.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether this error means the requested coin or price does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ServiceError::NotFound(_) => true,
            ServiceError::Store(e) => e.is_not_found(),
            ServiceError::Upstream(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Persistence errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Coin not found: {0}")]
    NotFound(String),

    #[error("Coin already exists: {0}")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Upstream price source errors.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Coin not known upstream: {0}")]
    NotFound(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Upstream call timed out after {0} seconds")]
    Timeout(u64),

    #[error("Rate limited by upstream")]
    RateLimited,

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl UpstreamError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, UpstreamError::NotFound(_))
    }
}

/// Cache backend errors.
///
/// These never leave the cache facade; they are logged and counted there.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
