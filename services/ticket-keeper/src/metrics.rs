//! Prometheus metrics exposition
//!
//! The libraries record counters through the `metrics` facade:
//!
//! - `credential_maintenance_total` (counter): label `outcome`
//! - `credential_login_total` (counter): label `outcome`
//! - `session_connect_attempts_total` (counter): label `outcome`
//! - `session_drops_total` (counter)
//!
//! This module adds the health gauges sampled by the health ticker:
//!
//! - `credential_up` (gauge): 1 while the credential is UP or UP_WITH_WARNING
//! - `session_connected` (gauge): 1 while the session is CONNECTED
//! - `service_up` (gauge): 1 while the overall status is UP or UP_WITH_WARNING

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use session::{ConnectionState, HealthSnapshot};

/// Install the global recorder and serve `/metrics` on `addr`.
///
/// Must be called from inside the tokio runtime; the exporter's listener is
/// spawned onto it.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Publish one health snapshot as gauges.
pub fn record_health(snapshot: &HealthSnapshot) {
    metrics::gauge!("credential_up").set(flag(snapshot.credential.status.is_up()));
    metrics::gauge!("session_connected")
        .set(flag(snapshot.connection == ConnectionState::Connected));
    metrics::gauge!("service_up").set(flag(snapshot.overall.is_up()));
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}
