//! Error types for session operations

/// Errors surfaced to callers of `connect()`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A non-authentication failure; not retried by the connector.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("connect failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("connect cancelled by disconnect")]
    Cancelled,
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
