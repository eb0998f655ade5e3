//! Error types for credential manager operations

/// Errors surfaced to callers of the credential manager.
///
/// Failures inside the background maintenance loop never become an `Error`;
/// they are logged and reflected in health instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("initial login failed after {attempts} attempt(s): {reason}")]
    FatalInit { attempts: u32, reason: String },

    #[error("credential manager already started")]
    AlreadyStarted,

    #[error("credential manager is shut down")]
    ShutDown,
}

/// Result alias for credential manager operations.
pub type Result<T> = std::result::Result<T, Error>;
