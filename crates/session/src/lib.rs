//! Authenticated session handling
//!
//! `SessionConnector` holds one logical session against a broker, using the
//! credential owned by `credential_manager::CredentialManager`. Authentication
//! failures force a credential refresh and retry; anything else is surfaced to
//! the caller. `HealthAggregator` combines credential and connection state into
//! a read-only snapshot.

pub mod classify;
pub mod connector;
pub mod error;
pub mod group;
pub mod health;
pub mod state;
pub mod tcp;
pub mod transport;

pub use classify::{FailureClass, TransportError, classify_failure};
pub use connector::{ConnectorConfig, SessionConnector};
pub use error::{Error, Result};
pub use group::{MemberState, SessionGroup, SessionRole};
pub use health::{HealthAggregator, HealthSnapshot};
pub use state::ConnectionState;
pub use tcp::TcpTransport;
pub use transport::{CredentialSource, EventSink, Session, SessionEvent, Transport};
