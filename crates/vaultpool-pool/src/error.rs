//! Pool error types.

use std::time::Duration;

use thiserror::Error;

use vaultpool_core::ConfigError;

/// Errors returned by [`ConnectionPool`](crate::ConnectionPool) operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No connection became available before the caller's deadline.
    #[error("no connection available within {waited:?} (max_size {max_size})")]
    Timeout { waited: Duration, max_size: usize },

    #[error("pool is suspended")]
    Suspended,

    #[error("pool is closed")]
    Closed,

    /// Double release, unknown handle, or a handle from another pool.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// Every attempt to establish a connection failed.
    #[error("failed to establish a connection after {attempts} attempt(s): {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    #[error("connection validation failed: {0}")]
    ValidationFailed(String),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

/// Convenience alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
