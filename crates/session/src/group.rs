//! Consumer/publisher session groups
//!
//! Shutdown order matters for messaging sessions: consumers stop first so no
//! new work arrives, publishers get `drain` to flush what is in flight.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::connector::SessionConnector;
use crate::error::Error;
use crate::state::ConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    Consumer,
    Publisher,
}

/// A named connector's role and state, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MemberState {
    pub name: String,
    pub role: SessionRole,
    pub state: ConnectionState,
}

#[derive(Default)]
pub struct SessionGroup {
    members: Vec<(SessionRole, SessionConnector)>,
}

impl SessionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, role: SessionRole, connector: SessionConnector) {
        self.members.push((role, connector));
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Connect every member. Failures are logged and returned; they do not
    /// stop the remaining members from connecting.
    pub async fn connect_all(&self) -> Vec<(String, Error)> {
        let mut failures = Vec::new();
        for (role, connector) in &self.members {
            if let Err(e) = connector.connect().await {
                warn!(connector = connector.name(), ?role, error = %e, "session failed to connect");
                failures.push((connector.name().to_string(), e));
            }
        }
        info!(
            members = self.members.len(),
            failed = failures.len(),
            "session group connected"
        );
        failures
    }

    /// Disconnect consumers, wait `drain`, then disconnect publishers.
    pub async fn disconnect_all(&self, drain: Duration) {
        self.disconnect_role(SessionRole::Consumer).await;
        if self.members.iter().any(|(role, _)| *role == SessionRole::Publisher) {
            tokio::time::sleep(drain).await;
            self.disconnect_role(SessionRole::Publisher).await;
        }
        info!("session group disconnected");
    }

    pub fn states(&self) -> Vec<MemberState> {
        self.members
            .iter()
            .map(|(role, connector)| MemberState {
                name: connector.name().to_string(),
                role: *role,
                state: connector.state(),
            })
            .collect()
    }

    async fn disconnect_role(&self, wanted: SessionRole) {
        for (role, connector) in &self.members {
            if *role == wanted {
                connector.disconnect().await;
            }
        }
    }
}
