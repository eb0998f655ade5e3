//! Kerberos credential acquisition
//!
//! Defines the immutable [`Credential`] value handed from the credential
//! manager to session transports, and the [`CredentialProvider`] seam that
//! performs the actual acquisition, renewal, and logout exchange. The crate has
//! no global state: every provider is built from an explicit
//! [`ProviderSettings`] value.
//!
//! Credential flow:
//! 1. The manager calls `CredentialProvider::acquire()` at startup
//! 2. Before expiry it calls `renew()` on renewable credentials
//! 3. If renewal fails or is unsupported it calls `acquire()` again
//! 4. On shutdown it calls `logout()` and `wipe_secrets()`
//!
//! [`KinitProvider`] is the reference provider: it drives the system Kerberos
//! tools against a private credential cache.

pub mod credential;
pub mod error;
pub mod kinit;
pub mod klist;
pub mod provider;

pub use credential::Credential;
pub use error::{Error, Result};
pub use kinit::KinitProvider;
pub use provider::{CredentialProvider, KerberosTools, ProviderSettings};
