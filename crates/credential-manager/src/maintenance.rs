//! Background credential maintenance
//!
//! One spawned task per manager. It sleeps until `expires_at - refresh_buffer`,
//! renews or re-acquires the credential under the manager's refresh lock, and
//! reschedules itself from whatever credential is current afterwards. The sleep
//! races a `CancellationToken` so shutdown interrupts it immediately; an
//! in-flight renewal is left to finish and shutdown bounds the wait.

use std::sync::Arc;
use std::time::Duration;

use credential::Credential;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::manager::CredentialManager;

/// Time until maintenance should run for a credential expiring at `expires_at`.
///
/// Zero when the credential is already inside the buffer.
pub fn schedule_delay(expires_at: Instant, refresh_buffer: Duration, now: Instant) -> Duration {
    expires_at
        .checked_sub(refresh_buffer)
        .map(|due| due.saturating_duration_since(now))
        .unwrap_or(Duration::ZERO)
}

/// Delay before the next run after a maintenance run finished.
///
/// A failed run, a missing credential, or a fresh credential that is already
/// inside the buffer all wait `retry_delay` so the loop never spins.
pub fn delay_after_run(
    credential: Option<&Credential>,
    succeeded: bool,
    refresh_buffer: Duration,
    retry_delay: Duration,
    now: Instant,
) -> Duration {
    match credential {
        Some(credential) if succeeded => {
            let delay = schedule_delay(credential.expires_at(), refresh_buffer, now);
            if delay.is_zero() { retry_delay } else { delay }
        }
        _ => retry_delay,
    }
}

/// Delay for a credential that arrived outside of a maintenance run
/// (initial login or an on-demand refresh).
fn delay_for(credential: Option<&Credential>, refresh_buffer: Duration, retry_delay: Duration) -> Duration {
    match credential {
        Some(credential) => schedule_delay(credential.expires_at(), refresh_buffer, Instant::now()),
        None => retry_delay,
    }
}

/// Spawn the maintenance loop for `manager`.
///
/// Runs until `cancel` fires. Failures are contained: they are reflected in
/// health and retried after `retry_delay`, never propagated.
pub fn spawn_maintenance_task(
    manager: Arc<CredentialManager>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let buffer = manager.config().refresh_buffer;
        let retry_delay = manager.config().retry_delay();
        let mut updates = manager.subscribe();

        let mut delay = delay_for(updates.borrow_and_update().as_deref(), buffer, retry_delay);
        loop {
            manager.set_next_maintenance(Instant::now() + delay);
            debug!(delay_ms = delay.as_millis() as u64, "next credential maintenance scheduled");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // Replaced by an on-demand refresh; follow the new expiry.
                    delay = delay_for(updates.borrow_and_update().as_deref(), buffer, retry_delay);
                    continue;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let succeeded = manager.run_maintenance().await;
            let current = updates.borrow_and_update().clone();
            delay = delay_after_run(current.as_deref(), succeeded, buffer, retry_delay, Instant::now());
        }

        manager.clear_next_maintenance();
        info!("credential maintenance stopped");
    })
}
