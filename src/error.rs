//! Error types for the Hivegate service.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Hivegate operations.
#[derive(Error, Debug)]
pub enum HivegateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a counter store backend.
///
/// The limiter never surfaces these to callers; they only drive the fail-open path.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Redis protocol or connection failure
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The backend did not answer in time
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// Increment attempted on a key holding a non-integer value
    #[error("Value at key {0} is not an integer")]
    NotAnInteger(String),

    /// Backend is not reachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for Hivegate operations.
pub type Result<T> = std::result::Result<T, HivegateError>;

/// Result type alias for counter store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
