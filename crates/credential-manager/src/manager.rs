//! Credential manager state and operations
//!
//! The current credential lives in a `watch` channel: readers take a short
//! synchronous borrow and clone the `Arc`, so `get_credential()` never waits on
//! a renewal. Every renewal or re-login (scheduled or on demand) runs under a
//! single async mutex; a caller that finds it held waits for the in-flight
//! operation and returns its result instead of repeating the work.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common::RetryPolicy;
use credential::{Credential, CredentialProvider};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::health::{self, CredentialHealth, HealthStatus};
use crate::maintenance;

/// Timing configuration for a manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maintenance runs this long before the credential expires.
    pub refresh_buffer: Duration,
    /// Initial login attempts; `base_delay` doubles as the maintenance retry delay.
    pub login_retry: RetryPolicy,
    /// Upper bound on waiting for an in-flight renewal during shutdown.
    pub shutdown_timeout: Duration,
}

impl ManagerConfig {
    pub fn retry_delay(&self) -> Duration {
        self.login_retry.base_delay
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::from_secs(3600),
            login_retry: RetryPolicy::fixed(3, Duration::from_secs(10)),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of `force_refresh_or_relogin()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The existing credential was renewed.
    Renewed,
    /// A full login produced a new credential.
    Relogged,
    /// Another caller's operation completed while this one waited.
    Coalesced,
    Failed(String),
}

impl RefreshOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::Renewed => "renewed",
            RefreshOutcome::Relogged => "relogged",
            RefreshOutcome::Coalesced => "coalesced",
            RefreshOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, RefreshOutcome::Failed(_))
    }
}

enum Lifecycle {
    NotStarted,
    Starting,
    Running {
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
    ShutDown,
}

/// Owns the current credential and serializes every attempt to replace it.
pub struct CredentialManager {
    provider: Arc<dyn CredentialProvider>,
    config: ManagerConfig,
    current: watch::Sender<Option<Arc<Credential>>>,
    refresh_lock: tokio::sync::Mutex<()>,
    refreshing: AtomicBool,
    /// Fired by `shutdown()`; interrupts the initial login backoff.
    stopping: CancellationToken,
    last_failure: Mutex<Option<String>>,
    status: AtomicU8,
    next_maintenance: Mutex<Option<Instant>>,
    lifecycle: Mutex<Lifecycle>,
}

impl CredentialManager {
    pub fn new(provider: Arc<dyn CredentialProvider>, config: ManagerConfig) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            provider,
            config,
            current,
            refresh_lock: tokio::sync::Mutex::new(()),
            refreshing: AtomicBool::new(false),
            stopping: CancellationToken::new(),
            last_failure: Mutex::new(None),
            status: AtomicU8::new(HealthStatus::Unknown.to_u8()),
            next_maintenance: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle::NotStarted),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Log in and start background maintenance.
    ///
    /// The initial login is retried per `login_retry`; when every attempt
    /// fails the error is `FatalInit` and health is `Down`.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle();
            match *lifecycle {
                Lifecycle::NotStarted => *lifecycle = Lifecycle::Starting,
                Lifecycle::ShutDown => return Err(Error::ShutDown),
                _ => return Err(Error::AlreadyStarted),
            }
        }

        let policy = self.config.login_retry;
        let mut attempt = 0;
        let credential = loop {
            attempt += 1;
            if self.is_shut_down() {
                return Err(Error::ShutDown);
            }
            let result = {
                let _guard = self.refresh_lock.lock().await;
                self.provider.acquire().await
            };
            match result {
                Ok(credential) => {
                    metrics::counter!("credential_login_total", "outcome" => "success").increment(1);
                    break credential;
                }
                Err(e) => {
                    metrics::counter!("credential_login_total", "outcome" => "failure").increment(1);
                    if !policy.allows_retry(attempt) {
                        error!(
                            provider = self.provider.id(),
                            attempt,
                            error = %e,
                            "initial login failed, giving up"
                        );
                        self.record_failure(e.to_string());
                        self.store_status(HealthStatus::Down);
                        let mut lifecycle = self.lifecycle();
                        if matches!(*lifecycle, Lifecycle::Starting) {
                            *lifecycle = Lifecycle::NotStarted;
                        }
                        drop(lifecycle);
                        return Err(Error::FatalInit {
                            attempts: attempt,
                            reason: e.to_string(),
                        });
                    }
                    let delay = policy.delay_after(attempt);
                    warn!(
                        provider = self.provider.id(),
                        attempt,
                        max_attempts = policy.max_attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "initial login failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = self.stopping.cancelled() => return Err(Error::ShutDown),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        info!(
            provider = self.provider.id(),
            subject = credential.subject(),
            expires_in_secs = credential.time_to_expiry().as_secs(),
            renewable = credential.renewable(),
            "initial login succeeded"
        );

        let credential = Arc::new(credential);
        let running = {
            let mut lifecycle = self.lifecycle();
            if matches!(*lifecycle, Lifecycle::Starting) {
                self.current.send_replace(Some(Arc::clone(&credential)));
                self.clear_failure();

                let cancel = CancellationToken::new();
                let task = maintenance::spawn_maintenance_task(Arc::clone(self), cancel.clone());
                *lifecycle = Lifecycle::Running { cancel, task };
                true
            } else {
                false
            }
        };
        if !running {
            // shutdown() ran while we were logging in; it never saw this ticket
            self.logout(&credential).await;
            return Err(Error::ShutDown);
        }
        self.check_health();
        Ok(())
    }

    /// The current credential, if any. Never waits on an in-flight renewal.
    pub fn get_credential(&self) -> Option<Arc<Credential>> {
        self.current.borrow().clone()
    }

    /// Watch credential replacement. The value is `None` before `start()` and
    /// after `shutdown()`.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Credential>>> {
        self.current.subscribe()
    }

    /// Recompute health from the current credential and cache the status.
    pub fn check_health(&self) -> CredentialHealth {
        let (started, shut_down) = {
            let lifecycle = self.lifecycle();
            (
                matches!(*lifecycle, Lifecycle::Running { .. }),
                matches!(*lifecycle, Lifecycle::ShutDown),
            )
        };
        let credential = self.get_credential();
        let failure = self.last_failure();

        let health = if shut_down {
            CredentialHealth::new(HealthStatus::Down, "credential manager shut down")
        } else if !started && credential.is_none() {
            match failure {
                Some(reason) => CredentialHealth::new(
                    HealthStatus::Down,
                    format!("initial login failed: {reason}"),
                ),
                None => CredentialHealth::new(HealthStatus::Unknown, "credential manager not started"),
            }
        } else {
            health::evaluate(credential.as_deref(), self.config.refresh_buffer, failure.as_deref())
        };
        self.store_status(health.status);
        health
    }

    /// Status from the last `check_health()` or lifecycle transition.
    pub fn health_status(&self) -> HealthStatus {
        HealthStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Whether a renewal or re-login is running right now.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// When the maintenance task will next run.
    pub fn next_maintenance(&self) -> Option<Instant> {
        *self.next_maintenance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Renew the credential, or log in again when renewal is impossible or fails.
    ///
    /// Called by session connectors after an authentication failure. Callers
    /// arriving while an operation is in flight wait for it and return
    /// `Coalesced` (or its failure) without touching the provider.
    pub async fn force_refresh_or_relogin(&self) -> RefreshOutcome {
        if self.is_shut_down() {
            return RefreshOutcome::Failed("credential manager is shut down".into());
        }

        // The lock is held from before an operation starts until after its
        // result is recorded, so a held lock always means a result to share.
        let _guard = match self.refresh_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let _guard = self.refresh_lock.lock().await;
                if self.is_shut_down() {
                    return RefreshOutcome::Failed("credential manager is shut down".into());
                }
                let outcome = match self.last_failure() {
                    Some(reason) => RefreshOutcome::Failed(reason),
                    None => RefreshOutcome::Coalesced,
                };
                debug!(outcome = outcome.label(), "joined in-flight credential refresh");
                metrics::counter!("credential_maintenance_total", "outcome" => "coalesced").increment(1);
                return outcome;
            }
        };

        info!("forced credential refresh requested");
        self.refresh_locked().await
    }

    /// One scheduled maintenance run. Returns whether it succeeded.
    pub(crate) async fn run_maintenance(&self) -> bool {
        let _guard = self.refresh_lock.lock().await;
        debug!("scheduled credential maintenance running");
        self.refresh_locked().await.is_success()
    }

    /// Renew or re-login. Caller holds `refresh_lock`.
    async fn refresh_locked(&self) -> RefreshOutcome {
        let _refreshing = RefreshingFlag::raise(&self.refreshing);

        let outcome = match self.get_credential() {
            Some(current) if current.can_renew() => match self.provider.renew(&current).await {
                Ok(renewed) => {
                    info!(
                        subject = renewed.subject(),
                        expires_in_secs = renewed.time_to_expiry().as_secs(),
                        "credential renewed"
                    );
                    self.publish(renewed);
                    RefreshOutcome::Renewed
                }
                Err(e) => {
                    warn!(error = %e, "renewal failed, falling back to full login");
                    self.relogin().await
                }
            },
            Some(current) => {
                debug!(
                    subject = current.subject(),
                    renewable = current.renewable(),
                    "credential cannot be renewed, logging in again"
                );
                self.relogin().await
            }
            None => self.relogin().await,
        };

        if let RefreshOutcome::Failed(reason) = &outcome {
            self.record_failure(reason.clone());
            self.store_status(HealthStatus::Down);
        } else {
            self.check_health();
        }
        metrics::counter!("credential_maintenance_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn relogin(&self) -> RefreshOutcome {
        match self.provider.acquire().await {
            Ok(credential) => {
                metrics::counter!("credential_login_total", "outcome" => "success").increment(1);
                info!(
                    subject = credential.subject(),
                    expires_in_secs = credential.time_to_expiry().as_secs(),
                    "re-login succeeded"
                );
                self.publish(credential);
                RefreshOutcome::Relogged
            }
            Err(e) => {
                metrics::counter!("credential_login_total", "outcome" => "failure").increment(1);
                error!(error = %e, "re-login failed, keeping previous credential");
                RefreshOutcome::Failed(e.to_string())
            }
        }
    }

    /// Stop maintenance, log out and wipe secrets. Idempotent.
    ///
    /// Waits at most `shutdown_timeout` for an in-flight renewal, then tears
    /// down regardless.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle(), Lifecycle::ShutDown);
        self.stopping.cancel();
        let task = match previous {
            Lifecycle::ShutDown => {
                debug!("credential manager already shut down");
                return;
            }
            Lifecycle::Running { cancel, task } => {
                cancel.cancel();
                Some(task)
            }
            Lifecycle::NotStarted | Lifecycle::Starting => None,
        };

        let deadline = Instant::now() + self.config.shutdown_timeout;
        if let Some(mut task) = task {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!(
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "maintenance did not finish in time, aborting it"
                );
                task.abort();
                // Resolves once the aborted run has been dropped.
                let _ = task.await;
            }
        }

        let guard = tokio::time::timeout_at(deadline, self.refresh_lock.lock()).await;
        if guard.is_err() {
            warn!("in-flight credential refresh did not finish before shutdown deadline");
        }

        if let Some(credential) = self.current.send_replace(None) {
            self.logout(&credential).await;
        }
        self.provider.wipe_secrets();
        self.clear_next_maintenance();
        self.store_status(HealthStatus::Down);
        info!("credential manager shut down");
    }

    async fn logout(&self, credential: &Credential) {
        match tokio::time::timeout(self.config.shutdown_timeout, self.provider.logout(credential)).await {
            Ok(Ok(())) => debug!(subject = credential.subject(), "logged out"),
            Ok(Err(e)) => warn!(error = %e, "logout failed"),
            Err(_) => warn!("logout timed out"),
        }
    }

    pub(crate) fn set_next_maintenance(&self, at: Instant) {
        *self.next_maintenance.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    pub(crate) fn clear_next_maintenance(&self) {
        *self.next_maintenance.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn publish(&self, credential: Credential) {
        if self.is_shut_down() {
            debug!("discarding credential acquired after shutdown");
            return;
        }
        self.current.send_replace(Some(Arc::new(credential)));
        self.clear_failure();
    }

    fn clear_failure(&self) {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn record_failure(&self, reason: String) {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }

    fn last_failure(&self) -> Option<String> {
        self.last_failure.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn store_status(&self, status: HealthStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    fn is_shut_down(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::ShutDown)
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps `refreshing` set for one renewal/re-login, including one that is
/// aborted mid-flight.
struct RefreshingFlag<'a>(&'a AtomicBool);

impl<'a> RefreshingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for RefreshingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;

    /// What the fake provider does for one call.
    #[derive(Clone)]
    enum Step {
        Grant { lifetime: Duration, renewable: bool },
        Fail(&'static str),
        Hang,
    }

    fn grant(secs: u64) -> Step {
        Step::Grant {
            lifetime: Duration::from_secs(secs),
            renewable: true,
        }
    }

    /// Scripted provider; an exhausted script repeats its last step.
    #[derive(Default)]
    struct FakeProvider {
        acquire_script: Mutex<VecDeque<Step>>,
        renew_script: Mutex<VecDeque<Step>>,
        acquires: AtomicUsize,
        renews: AtomicUsize,
        logouts: AtomicUsize,
        wiped: AtomicBool,
        acquire_latency: Duration,
        renew_latency: Duration,
    }

    impl FakeProvider {
        fn new(acquire: Vec<Step>, renew: Vec<Step>) -> Self {
            Self {
                acquire_script: Mutex::new(acquire.into()),
                renew_script: Mutex::new(renew.into()),
                ..Default::default()
            }
        }

        fn next(script: &Mutex<VecDeque<Step>>) -> Step {
            let mut script = script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap_or(Step::Fail("no script"))
            }
        }

        async fn perform(step: Step, serial: usize) -> credential::Result<Credential> {
            match step {
                Step::Grant { lifetime, renewable } => {
                    let cred = Credential::new(
                        "svc@EXAMPLE.COM",
                        Instant::now() + lifetime,
                        format!("ticket-{serial}").into_bytes(),
                    )?;
                    Ok(if renewable { cred.with_renewal(None) } else { cred })
                }
                Step::Fail(reason) => Err(credential::Error::Login(reason.into())),
                Step::Hang => std::future::pending().await,
            }
        }
    }

    impl CredentialProvider for FakeProvider {
        fn id(&self) -> &str {
            "fake"
        }

        fn acquire(&self) -> Pin<Box<dyn Future<Output = credential::Result<Credential>> + Send + '_>> {
            let serial = self.acquires.fetch_add(1, Ordering::SeqCst);
            let step = Self::next(&self.acquire_script);
            let latency = self.acquire_latency;
            Box::pin(async move {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                Self::perform(step, serial).await
            })
        }

        fn renew<'a>(
            &'a self,
            _current: &'a Credential,
        ) -> Pin<Box<dyn Future<Output = credential::Result<Credential>> + Send + 'a>> {
            let serial = 1000 + self.renews.fetch_add(1, Ordering::SeqCst);
            let step = Self::next(&self.renew_script);
            Box::pin(async move {
                if !self.renew_latency.is_zero() {
                    tokio::time::sleep(self.renew_latency).await;
                }
                match Self::perform(step, serial).await {
                    Err(credential::Error::Login(r)) => Err(credential::Error::Renewal(r)),
                    other => other,
                }
            })
        }

        fn logout<'a>(
            &'a self,
            _current: &'a Credential,
        ) -> Pin<Box<dyn Future<Output = credential::Result<()>> + Send + 'a>> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn wipe_secrets(&self) {
            self.wiped.store(true, Ordering::SeqCst);
        }
    }

    fn config(buffer_secs: u64) -> ManagerConfig {
        ManagerConfig {
            refresh_buffer: Duration::from_secs(buffer_secs),
            login_retry: RetryPolicy::fixed(3, Duration::from_secs(1)),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    fn manager(provider: &Arc<FakeProvider>, config: ManagerConfig) -> Arc<CredentialManager> {
        Arc::new(CredentialManager::new(
            Arc::clone(provider) as Arc<dyn CredentialProvider>,
            config,
        ))
    }

    /// Let spawned tasks run without moving the clock.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_publishes_credential_and_reports_up() {
        let provider = Arc::new(FakeProvider::new(vec![grant(3600)], vec![grant(3600)]));
        let mgr = manager(&provider, config(60));
        assert_eq!(mgr.health_status(), HealthStatus::Unknown);

        mgr.start().await.unwrap();

        let cred = mgr.get_credential().unwrap();
        assert_eq!(cred.subject(), "svc@EXAMPLE.COM");
        assert_eq!(mgr.health_status(), HealthStatus::Up);
        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_retries_then_fails_fatally() {
        let provider = Arc::new(FakeProvider::new(vec![Step::Fail("KDC unreachable")], vec![]));
        let mgr = manager(&provider, config(60));

        let err = mgr.start().await.unwrap_err();
        match err {
            Error::FatalInit { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("KDC unreachable"));
            }
            other => panic!("expected FatalInit, got {other:?}"),
        }
        assert_eq!(provider.acquires.load(Ordering::SeqCst), 3);
        assert!(mgr.get_credential().is_none());
        assert_eq!(mgr.health_status(), HealthStatus::Down);
        assert_eq!(mgr.check_health().status, HealthStatus::Down);
    }

    #[tokio::test(start_paused = true)]
    async fn start_recovers_after_transient_failure() {
        let provider = Arc::new(FakeProvider::new(vec![Step::Fail("timeout"), grant(3600)], vec![]));
        let mgr = manager(&provider, config(60));
        mgr.start().await.unwrap();
        assert_eq!(provider.acquires.load(Ordering::SeqCst), 2);
        assert_eq!(mgr.health_status(), HealthStatus::Up);
        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_rejected() {
        let provider = Arc::new(FakeProvider::new(vec![grant(3600)], vec![]));
        let mgr = manager(&provider, config(60));
        mgr.start().await.unwrap();
        assert!(matches!(mgr.start().await, Err(Error::AlreadyStarted)));
        mgr.shutdown().await;
        assert!(matches!(mgr.start().await, Err(Error::ShutDown)));
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_fires_buffer_before_expiry() {
        let provider = Arc::new(FakeProvider::new(vec![grant(10)], vec![grant(10)]));
        let mgr = manager(&provider, config(2));
        let started = Instant::now();
        mgr.start().await.unwrap();
        settle().await;

        assert_eq!(mgr.next_maintenance(), Some(started + Duration::from_secs(8)));

        tokio::time::advance(Duration::from_millis(7_900)).await;
        settle().await;
        assert_eq!(provider.renews.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(provider.renews.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.check_health().status, HealthStatus::Up);
        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_failure_falls_back_to_login() {
        let provider = Arc::new(FakeProvider::new(
            vec![grant(10), grant(3600)],
            vec![Step::Fail("ticket not renewable")],
        ));
        let mgr = manager(&provider, config(2));
        mgr.start().await.unwrap();
        let first = mgr.get_credential().unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        settle().await;

        assert_eq!(provider.renews.load(Ordering::SeqCst), 1);
        assert_eq!(provider.acquires.load(Ordering::SeqCst), 2);
        let second = mgr.get_credential().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(mgr.check_health().status, HealthStatus::Up);
        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn both_failing_marks_down_and_retries_after_delay() {
        let provider = Arc::new(FakeProvider::new(
            vec![grant(10), Step::Fail("KDC unreachable")],
            vec![Step::Fail("renewal refused")],
        ));
        let mgr = manager(&provider, config(2));
        mgr.start().await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        settle().await;
        let failed_at = Instant::now();

        assert_eq!(mgr.health_status(), HealthStatus::Down);
        let health = mgr.check_health();
        assert_eq!(health.status, HealthStatus::Down);
        assert!(health.message.contains("KDC unreachable"), "got: {}", health.message);
        // retry_delay is the login policy's base delay
        assert_eq!(mgr.next_maintenance(), Some(failed_at + Duration::from_secs(1)));
        // old credential stays until something better arrives
        assert!(mgr.get_credential().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(provider.renews.load(Ordering::SeqCst), 2);
        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn non_renewable_credential_goes_straight_to_login() {
        let provider = Arc::new(FakeProvider::new(
            vec![Step::Grant {
                lifetime: Duration::from_secs(3600),
                renewable: false,
            }],
            vec![grant(3600)],
        ));
        let mgr = manager(&provider, config(60));
        mgr.start().await.unwrap();

        let outcome = mgr.force_refresh_or_relogin().await;
        assert_eq!(outcome, RefreshOutcome::Relogged);
        assert_eq!(provider.renews.load(Ordering::SeqCst), 0);
        assert_eq!(provider.acquires.load(Ordering::SeqCst), 2);
        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_forced_refreshes_share_one_renewal() {
        let mut provider = FakeProvider::new(vec![grant(3600)], vec![grant(3600)]);
        provider.renew_latency = Duration::from_millis(500);
        let provider = Arc::new(provider);
        let mgr = manager(&provider, config(60));
        mgr.start().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let mgr = Arc::clone(&mgr);
            handles.push(tokio::spawn(async move { mgr.force_refresh_or_relogin().await }));
        }
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        assert_eq!(provider.renews.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes.iter().filter(|o| **o == RefreshOutcome::Renewed).count(), 1);
        assert_eq!(outcomes.iter().filter(|o| **o == RefreshOutcome::Coalesced).count(), 7);
        assert!(!mgr.is_refreshing());
        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn forced_refresh_reports_failure() {
        let provider = Arc::new(FakeProvider::new(
            vec![grant(3600), Step::Fail("bad password")],
            vec![Step::Fail("expired")],
        ));
        let mgr = manager(&provider, config(60));
        mgr.start().await.unwrap();

        let outcome = mgr.force_refresh_or_relogin().await;
        assert!(matches!(outcome, RefreshOutcome::Failed(ref r) if r.contains("bad password")));
        assert_eq!(mgr.health_status(), HealthStatus::Down);
        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_replacement() {
        let provider = Arc::new(FakeProvider::new(vec![grant(3600)], vec![grant(7200)]));
        let mgr = manager(&provider, config(60));
        mgr.start().await.unwrap();

        let mut rx = mgr.subscribe();
        rx.borrow_and_update();
        assert_eq!(mgr.force_refresh_or_relogin().await, RefreshOutcome::Renewed);
        assert!(rx.has_changed().unwrap());
        let renewed = rx.borrow_and_update().clone().unwrap();
        assert_eq!(renewed.handle().expose(), b"ticket-1000");
        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_logs_out_and_wipes() {
        let provider = Arc::new(FakeProvider::new(vec![grant(3600)], vec![]));
        let mgr = manager(&provider, config(60));
        mgr.start().await.unwrap();

        mgr.shutdown().await;
        assert_eq!(provider.logouts.load(Ordering::SeqCst), 1);
        assert!(provider.wiped.load(Ordering::SeqCst));
        assert!(mgr.get_credential().is_none());
        assert!(mgr.next_maintenance().is_none());
        assert_eq!(mgr.health_status(), HealthStatus::Down);
        assert_eq!(
            mgr.force_refresh_or_relogin().await,
            RefreshOutcome::Failed("credential manager is shut down".into())
        );

        mgr.shutdown().await;
        assert_eq!(provider.logouts.load(Ordering::SeqCst), 1, "shutdown is idempotent");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_bounded_when_renewal_hangs() {
        let provider = Arc::new(FakeProvider::new(vec![grant(10)], vec![Step::Hang]));
        let mgr = manager(&provider, config(2));
        mgr.start().await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        settle().await;
        assert!(mgr.is_refreshing());

        let before = Instant::now();
        mgr.shutdown().await;
        assert!(Instant::now() - before <= Duration::from_secs(5));
        assert!(mgr.get_credential().is_none());
        assert!(provider.wiped.load(Ordering::SeqCst));
        assert!(!mgr.is_refreshing(), "aborted renewal must not leave the flag set");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_login_backoff() {
        let provider = Arc::new(FakeProvider::new(
            vec![Step::Fail("kdc timeout"), grant(3600)],
            vec![],
        ));
        let mgr = manager(&provider, config(60));

        let starting = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.start().await })
        };
        settle().await;
        assert_eq!(provider.acquires.load(Ordering::SeqCst), 1);

        mgr.shutdown().await;
        let result = starting.await.unwrap();
        assert!(matches!(result, Err(Error::ShutDown)), "got: {result:?}");
        assert_eq!(provider.acquires.load(Ordering::SeqCst), 1, "no login after shutdown");
        assert_eq!(provider.logouts.load(Ordering::SeqCst), 0);
        assert!(mgr.get_credential().is_none());
        assert_eq!(mgr.health_status(), HealthStatus::Down);
    }

    #[tokio::test(start_paused = true)]
    async fn ticket_acquired_during_shutdown_is_logged_out() {
        let mut provider = FakeProvider::new(vec![grant(3600)], vec![]);
        provider.acquire_latency = Duration::from_secs(2);
        let provider = Arc::new(provider);
        let mgr = manager(&provider, config(60));

        let starting = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.start().await })
        };
        settle().await;

        mgr.shutdown().await;
        let result = starting.await.unwrap();
        assert!(matches!(result, Err(Error::ShutDown)), "got: {result:?}");
        assert_eq!(provider.acquires.load(Ordering::SeqCst), 1);
        assert_eq!(provider.logouts.load(Ordering::SeqCst), 1);
        assert!(mgr.get_credential().is_none());
        assert!(mgr.next_maintenance().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_refreshes_on_worker_threads_share_one_renewal() {
        let mut provider = FakeProvider::new(vec![grant(3600)], vec![grant(3600)]);
        provider.renew_latency = Duration::from_millis(200);
        let provider = Arc::new(provider);
        let mgr = manager(&provider, config(60));
        mgr.start().await.unwrap();

        let callers = 8;
        let barrier = Arc::new(tokio::sync::Barrier::new(callers));
        let mut handles = Vec::new();
        for _ in 0..callers {
            let mgr = Arc::clone(&mgr);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                mgr.force_refresh_or_relogin().await
            }));
        }
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        assert_eq!(provider.renews.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes.iter().filter(|o| **o == RefreshOutcome::Renewed).count(), 1);
        assert!(outcomes.iter().all(RefreshOutcome::is_success));
        mgr.shutdown().await;
    }
}
