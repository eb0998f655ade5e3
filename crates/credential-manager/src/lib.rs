//! Credential lifecycle management
//!
//! Keeps one valid Kerberos credential available at all times. The manager
//! logs in at startup, publishes the credential for readers, and runs a single
//! background maintenance task that renews (or fully re-acquires) the
//! credential shortly before it expires.
//!
//! Credential lifecycle:
//! 1. `start()` logs in, retrying per the login `RetryPolicy`; failure is fatal
//! 2. Maintenance fires at `expires_at - refresh_buffer`
//! 3. Renewable credentials are renewed; otherwise, or on renewal failure, a
//!    full re-login runs
//! 4. Failures inside maintenance mark health `Down` and retry after a short delay
//! 5. Session connectors call `force_refresh_or_relogin()` on authentication
//!    failures; concurrent calls share one underlying operation
//! 6. `shutdown()` stops maintenance, logs out and wipes secrets

pub mod error;
pub mod health;
pub mod maintenance;
pub mod manager;

pub use error::{Error, Result};
pub use health::{CredentialHealth, HealthStatus};
pub use maintenance::schedule_delay;
pub use manager::{CredentialManager, ManagerConfig, RefreshOutcome};
