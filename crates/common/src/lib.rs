//! Shared types for the ticket-keeper workspace
//!
//! Holds the pieces every crate needs: the zeroizing [`Secret`] wrapper for
//! passwords and ticket material, the configuration [`Error`], and the
//! [`RetryPolicy`] used by both credential acquisition and session connects.

mod error;
mod retry;
mod secret;

pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use secret::Secret;
