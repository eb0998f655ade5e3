//! Transport and credential seams
//!
//! The connector talks to the outside world through two traits:
//! - `Transport` opens a session with an explicit credential and reports later
//!   lifecycle events through an `EventSink`
//! - `CredentialSource` hands out the current credential and forces a refresh
//!
//! Both use `Pin<Box<dyn Future>>` returns so they can be shared as
//! `Arc<dyn Trait>`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use credential::Credential;
use credential_manager::{CredentialHealth, CredentialManager, RefreshOutcome};
use tokio::sync::mpsc;

use crate::classify::TransportError;

/// Lifecycle events a transport reports after `open` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session was lost and the transport will not recover it.
    Dropped(String),
    /// The transport is reconnecting on its own.
    Reconnecting,
    /// The transport recovered the session.
    Reconnected,
}

/// Sending half for session events, one per opened session.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report an event. Returns false once nobody listens anymore.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// An open session handle.
pub trait Session: Send + Sync {
    fn is_closed(&self) -> bool;

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Opens sessions against the remote endpoint.
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "tcp")
    fn id(&self) -> &str;

    /// Open a session authenticated with `credential`.
    ///
    /// Errors the transport understands should be returned as
    /// `TransportError::auth` or `TransportError::other`; raw protocol-library
    /// text goes through `TransportError::unclassified`.
    fn open(
        &self,
        credential: Arc<Credential>,
        events: EventSink,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Session>, TransportError>> + Send + '_>>;
}

/// Where the connector gets credentials from.
pub trait CredentialSource: Send + Sync {
    /// Current credential, without waiting on an in-flight renewal.
    fn current(&self) -> Option<Arc<Credential>>;

    /// Renew or re-acquire after an authentication failure.
    fn force_refresh(&self) -> Pin<Box<dyn Future<Output = RefreshOutcome> + Send + '_>>;

    /// Health recomputed from the current credential.
    fn health(&self) -> CredentialHealth;
}

impl CredentialSource for CredentialManager {
    fn current(&self) -> Option<Arc<Credential>> {
        self.get_credential()
    }

    fn force_refresh(&self) -> Pin<Box<dyn Future<Output = RefreshOutcome> + Send + '_>> {
        Box::pin(self.force_refresh_or_relogin())
    }

    fn health(&self) -> CredentialHealth {
        self.check_health()
    }
}
