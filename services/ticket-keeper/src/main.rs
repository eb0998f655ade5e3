//! Ticket Keeper
//!
//! Single-binary service that:
//! 1. Acquires a Kerberos ticket for its service principal
//! 2. Keeps it renewed (or re-acquired) ahead of expiry
//! 3. Holds an authenticated broker session, refreshing the ticket on auth failures
//! 4. Logs and exports combined credential/session health

mod config;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use credential::KinitProvider;
use credential_manager::{CredentialManager, HealthStatus};
use session::{
    ConnectionState, CredentialSource, HealthAggregator, HealthSnapshot, SessionConnector,
    TcpTransport,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting ticket-keeper");

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str);

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        principal = %config.kerberos.principal,
        realm = config.kerberos.realm.as_deref().unwrap_or("-"),
        keytab = config.kerberos.keytab_path.is_some(),
        host = %config.session.host,
        vpn = %config.session.vpn_name,
        "configuration loaded"
    );

    if let Some(addr) = config.telemetry.metrics_addr {
        metrics::install_exporter(addr)
            .with_context(|| format!("failed to start metrics exporter on {addr}"))?;
        info!(%addr, "metrics exporter listening");
    }

    let provider = KinitProvider::new(config.provider_settings())
        .context("failed to prepare Kerberos provider")?;
    let manager = Arc::new(CredentialManager::new(
        Arc::new(provider),
        config.manager_config(),
    ));
    manager
        .start()
        .await
        .context("initial Kerberos login failed")?;

    let credentials: Arc<dyn CredentialSource> = manager.clone();
    let transport = TcpTransport::new(&config.session.host, &config.session.vpn_name);
    let connector = SessionConnector::new(
        "broker",
        Arc::new(transport),
        credentials.clone(),
        config.connector_config(),
    );

    if let Err(e) = connector.connect().await {
        manager.shutdown().await;
        return Err(e).context("failed to open broker session");
    }

    let aggregator = HealthAggregator::new(credentials, connector.clone());
    let interval = Duration::from_secs(config.telemetry.health_log_interval_secs);

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = supervise(&aggregator, &connector, interval) => {}
    }

    // Session first so nothing is using the ticket when it is destroyed
    connector.disconnect().await;
    manager.shutdown().await;
    report(&aggregator.health());

    info!("ticket-keeper stopped");
    Ok(())
}

/// Report health every `interval` and retry the session once it has given up.
async fn supervise(aggregator: &HealthAggregator, connector: &SessionConnector, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let snapshot = aggregator.health();
        report(&snapshot);

        if snapshot.connection == ConnectionState::Failed {
            info!(connector = connector.name(), "retrying failed session");
            if let Err(e) = connector.connect().await {
                warn!(connector = connector.name(), error = %e, "session retry failed");
            }
        }
    }
}

fn report(snapshot: &HealthSnapshot) {
    metrics::record_health(snapshot);
    let health = snapshot.to_json();
    match snapshot.overall {
        HealthStatus::Up => info!(%health, "health"),
        HealthStatus::UpWithWarning | HealthStatus::Unknown => warn!(%health, "health"),
        HealthStatus::Down => error!(%health, "health"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
