//! Error types for the event store

use deadpool_postgres::{CreatePoolError, PoolError};

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by an [`EventStore`](super::EventStore)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Pool or connection settings are unusable
    #[error("Store configuration error: {0}")]
    Configuration(String),

    /// No connection could be obtained
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The statement was rejected or failed mid-flight
    #[error("Query failed: {0}")]
    Query(String),

    /// The pool has been closed by shutdown
    #[error("Store closed")]
    Closed,
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Closed => StoreError::Closed,
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<CreatePoolError> for StoreError {
    fn from(err: CreatePoolError) -> Self {
        StoreError::Configuration(err.to_string())
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Query(err.to_string())
        }
    }
}
