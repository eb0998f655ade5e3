//! Error types for credential acquisition and renewal

/// Errors from a credential provider.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("login failed: {0}")]
    Login(String),

    #[error("renewal failed: {0}")]
    Renewal(String),

    #[error("credential is not renewable")]
    NotRenewable,

    #[error("credential expired: {0}")]
    Expired(String),

    #[error("logout failed: {0}")]
    Logout(String),

    #[error("ticket cache parse error: {0}")]
    Parse(String),

    #[error("invalid provider settings: {0}")]
    Settings(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
