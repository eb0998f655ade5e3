//! Read-only health view over the credential and the session

use std::sync::Arc;

use credential_manager::{CredentialHealth, HealthStatus};
use serde::Serialize;

use crate::connector::SessionConnector;
use crate::state::ConnectionState;
use crate::transport::CredentialSource;

/// Point-in-time health of the credential and the session.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub credential: CredentialHealth,
    pub connection: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
    pub overall: HealthStatus,
}

impl HealthSnapshot {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Combines both components' state. Holds no state of its own and never
/// mutates the components.
#[derive(Clone)]
pub struct HealthAggregator {
    credentials: Arc<dyn CredentialSource>,
    connector: SessionConnector,
}

impl HealthAggregator {
    pub fn new(credentials: Arc<dyn CredentialSource>, connector: SessionConnector) -> Self {
        Self {
            credentials,
            connector,
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        let credential = self.credentials.health();
        let connection = self.connector.state();
        let overall = overall(&credential, connection);
        HealthSnapshot {
            connection_error: self.connector.last_error(),
            credential,
            connection,
            overall,
        }
    }
}

fn overall(credential: &CredentialHealth, connection: ConnectionState) -> HealthStatus {
    if credential.status == HealthStatus::Down || connection != ConnectionState::Connected {
        return HealthStatus::Down;
    }
    match credential.status {
        HealthStatus::UpWithWarning => HealthStatus::UpWithWarning,
        HealthStatus::Unknown => HealthStatus::Unknown,
        _ => HealthStatus::Up,
    }
}
