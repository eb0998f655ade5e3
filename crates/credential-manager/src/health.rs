//! Credential health evaluation

use std::time::Duration;

use credential::Credential;
use serde::Serialize;

/// Health of the credential, recomputed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Up,
    UpWithWarning,
    Down,
    Unknown,
}

impl HealthStatus {
    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Up => "up",
            HealthStatus::UpWithWarning => "up_with_warning",
            HealthStatus::Down => "down",
            HealthStatus::Unknown => "unknown",
        }
    }

    /// Up or UpWithWarning.
    pub fn is_up(&self) -> bool {
        matches!(self, HealthStatus::Up | HealthStatus::UpWithWarning)
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            HealthStatus::Up => 0,
            HealthStatus::UpWithWarning => 1,
            HealthStatus::Down => 2,
            HealthStatus::Unknown => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => HealthStatus::Up,
            1 => HealthStatus::UpWithWarning,
            2 => HealthStatus::Down,
            _ => HealthStatus::Unknown,
        }
    }
}

/// Status plus a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialHealth {
    pub status: HealthStatus,
    pub message: String,
}

impl CredentialHealth {
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Evaluate health from the current credential.
///
/// - no credential or expired: `Down`
/// - last maintenance failed: `Down`, even if the old credential is still valid
/// - inside the refresh buffer: `UpWithWarning`
/// - otherwise `Up`
pub fn evaluate(
    credential: Option<&Credential>,
    refresh_buffer: Duration,
    last_failure: Option<&str>,
) -> CredentialHealth {
    let Some(credential) = credential else {
        return CredentialHealth::new(HealthStatus::Down, "no credential available");
    };
    if credential.is_expired() {
        return CredentialHealth::new(
            HealthStatus::Down,
            format!("credential for {} has expired", credential.subject()),
        );
    }

    let remaining = credential.time_to_expiry();
    if let Some(reason) = last_failure {
        return CredentialHealth::new(
            HealthStatus::Down,
            format!(
                "last refresh failed ({reason}); credential expires in {}",
                human(remaining)
            ),
        );
    }
    if remaining <= refresh_buffer {
        return CredentialHealth::new(
            HealthStatus::UpWithWarning,
            format!("credential expires soon, in {}", human(remaining)),
        );
    }
    CredentialHealth::new(
        HealthStatus::Up,
        format!("credential valid for {}", human(remaining)),
    )
}

fn human(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m{}s", secs / 60, secs % 60),
        _ => format!("{}h{}m", secs / 3600, (secs % 3600) / 60),
    }
}
