//! Session connector with authentication-failure recovery
//!
//! `connect()` claims the `Connecting` state by compare-and-swap, then runs
//! attempts until one succeeds:
//! - the credential is fetched fresh from the `CredentialSource` every attempt
//! - an expired or missing credential is an authentication failure and the
//!   transport is not called
//! - authentication failures force a credential refresh and retry after the
//!   `RetryPolicy` backoff, up to `max_attempts`
//! - any other failure is surfaced immediately
//!
//! Each opened session gets an epoch and an event watcher task. A `Dropped`
//! event from the current session moves the state to `Reconnecting` and spawns
//! a fresh `connect()`; events from superseded sessions are ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use common::RetryPolicy;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classify::{FailureClass, TransportError, classify_failure};
use crate::error::{Error, Result};
use crate::state::{ConnectionState, StateCell};
use crate::transport::{CredentialSource, EventSink, Session, SessionEvent, Transport};

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Bound on a single `Transport::open` call.
    pub connection_timeout: Duration,
    /// Attempts and backoff for authentication failures.
    pub retry: RetryPolicy,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            retry: RetryPolicy::fixed(3, Duration::from_secs(10)),
        }
    }
}

struct ActiveSession {
    epoch: u64,
    session: Box<dyn Session>,
    watcher: JoinHandle<()>,
}

struct Inner {
    name: String,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialSource>,
    config: ConnectorConfig,
    state: StateCell,
    /// Held across the `Connecting -> Connected` CAS and the store, and by
    /// `disconnect()`, so a session can never be published after disconnect.
    session: tokio::sync::Mutex<Option<ActiveSession>>,
    epoch: AtomicU64,
    cancel: Mutex<CancellationToken>,
    last_error: Mutex<Option<String>>,
}

/// Outcome of a single attempt.
enum AttemptError {
    Failed(TransportError),
    Cancelled,
}

/// Holds one logical session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionConnector {
    inner: Arc<Inner>,
}

impl SessionConnector {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                transport,
                credentials,
                config,
                state: StateCell::new(ConnectionState::Disconnected),
                session: tokio::sync::Mutex::new(None),
                epoch: AtomicU64::new(0),
                cancel: Mutex::new(CancellationToken::new()),
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.load()
    }

    /// Message of the most recent failed attempt or drop.
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Connected and the transport has not closed the session.
    pub async fn is_connected(&self) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }
        let slot = self.inner.session.lock().await;
        slot.as_ref().is_some_and(|active| !active.session.is_closed())
    }

    /// Open the session, recovering from authentication failures.
    ///
    /// A call made while another connect is in flight, or while connected,
    /// returns `Ok(())` without doing anything.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let Some(from) = inner.state.begin_connect() else {
            debug!(
                connector = %inner.name,
                state = self.state().label(),
                "connect ignored, already connecting or connected"
            );
            return Ok(());
        };
        let cancel = {
            let mut token = inner.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            *token = CancellationToken::new();
            token.clone()
        };
        info!(connector = %inner.name, from = from.label(), transport = inner.transport.id(), "connecting");

        let policy = inner.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let err = match self.attempt(&cancel).await {
                Ok(()) => {
                    metrics::counter!("session_connect_attempts_total", "outcome" => "connected").increment(1);
                    info!(connector = %inner.name, attempt, "session connected");
                    return Ok(());
                }
                Err(AttemptError::Cancelled) => return Err(Error::Cancelled),
                Err(AttemptError::Failed(err)) => err,
            };

            let class = classify_failure(&err);
            metrics::counter!("session_connect_attempts_total", "outcome" => class.label()).increment(1);
            self.record_error(&err.message);

            match class {
                FailureClass::OtherFailure => {
                    error!(connector = %inner.name, attempt, error = %err, "connect failed");
                    return self.fail(Error::Transport(err.message)).await;
                }
                FailureClass::AuthFailure if !policy.allows_retry(attempt) => {
                    error!(
                        connector = %inner.name,
                        attempt,
                        error = %err,
                        "authentication still failing, giving up"
                    );
                    return self
                        .fail(Error::RetryExhausted {
                            attempts: attempt,
                            last_error: err.message,
                        })
                        .await;
                }
                FailureClass::AuthFailure => {
                    let outcome = inner.credentials.force_refresh().await;
                    let delay = policy.delay_after(attempt);
                    warn!(
                        connector = %inner.name,
                        attempt,
                        max_attempts = policy.max_attempts,
                        refresh = outcome.label(),
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "authentication failure, retrying with refreshed credential"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Close the session and stop any connect in progress. Idempotent.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();

        let active = {
            let mut slot = inner.session.lock().await;
            inner.state.store(ConnectionState::Disconnected);
            slot.take()
        };
        if let Some(active) = active {
            active.watcher.abort();
            active.session.close().await;
            info!(connector = %inner.name, epoch = active.epoch, "session closed");
        }
    }

    async fn attempt(&self, cancel: &CancellationToken) -> std::result::Result<(), AttemptError> {
        let inner = &self.inner;
        let credential = match inner.credentials.current() {
            Some(credential) if !credential.is_expired() => credential,
            Some(credential) => {
                return Err(AttemptError::Failed(TransportError::auth(format!(
                    "credential for {} has expired",
                    credential.subject()
                ))));
            }
            None => {
                return Err(AttemptError::Failed(TransportError::auth(
                    "no credential available",
                )));
            }
        };

        let epoch = inner.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let (sink, events) = EventSink::channel();
        let timeout = inner.config.connection_timeout;
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
            opened = tokio::time::timeout(timeout, inner.transport.open(credential, sink)) => opened,
        };
        let session = match opened {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => return Err(AttemptError::Failed(err)),
            Err(_) => {
                return Err(AttemptError::Failed(TransportError::other(format!(
                    "connect timed out after {}ms",
                    timeout.as_millis()
                ))));
            }
        };

        let mut slot = inner.session.lock().await;
        if !inner
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
        {
            drop(slot);
            debug!(connector = %inner.name, epoch, "disconnected while opening, closing new session");
            session.close().await;
            return Err(AttemptError::Cancelled);
        }
        let watcher = tokio::spawn(watch_events(Arc::downgrade(inner), epoch, events));
        let previous = slot.replace(ActiveSession {
            epoch,
            session,
            watcher,
        });
        drop(slot);

        self.clear_error();
        if let Some(previous) = previous {
            previous.watcher.abort();
            previous.session.close().await;
            debug!(connector = %inner.name, epoch = previous.epoch, "superseded session closed");
        }
        Ok(())
    }

    /// Move `Connecting -> Failed` and release the session a drop left behind.
    async fn fail(&self, err: Error) -> Result<()> {
        let inner = &self.inner;
        let mut slot = inner.session.lock().await;
        if !inner
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Failed)
        {
            return Err(Error::Cancelled);
        }
        let stale = slot.take();
        drop(slot);

        if let Some(stale) = stale {
            stale.watcher.abort();
            stale.session.close().await;
            debug!(connector = %inner.name, epoch = stale.epoch, "dropped session released");
        }
        Err(err)
    }

    fn record_error(&self, message: &str) {
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(message.to_string());
    }

    fn clear_error(&self) {
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn handle_event(&self, epoch: u64, event: SessionEvent) {
        let inner = &self.inner;
        if inner.epoch.load(Ordering::Acquire) != epoch {
            debug!(connector = %inner.name, epoch, ?event, "ignoring event from superseded session");
            return;
        }

        match event {
            SessionEvent::Reconnecting => {
                if inner
                    .state
                    .transition(ConnectionState::Connected, ConnectionState::Reconnecting)
                {
                    info!(connector = %inner.name, "transport reconnecting");
                }
            }
            SessionEvent::Reconnected => {
                if inner
                    .state
                    .transition(ConnectionState::Reconnecting, ConnectionState::Connected)
                {
                    info!(connector = %inner.name, "transport reconnected");
                }
            }
            SessionEvent::Dropped(reason) => {
                let claimed = inner.state.transition_any(
                    &[ConnectionState::Connected, ConnectionState::Reconnecting],
                    ConnectionState::Reconnecting,
                );
                if claimed.is_none() {
                    debug!(connector = %inner.name, reason = %reason, "drop ignored, not connected");
                    return;
                }
                metrics::counter!("session_drops_total").increment(1);
                warn!(connector = %inner.name, reason = %reason, "session dropped, reconnecting");
                self.record_error(&reason);

                let connector = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = connector.connect().await {
                        error!(connector = %connector.inner.name, error = %e, "reconnect failed");
                    }
                });
            }
        }
    }
}

/// Forward one session's events to its connector until the session ends.
async fn watch_events(
    inner: Weak<Inner>,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        SessionConnector { inner }.handle_event(epoch, event);
    }
}
