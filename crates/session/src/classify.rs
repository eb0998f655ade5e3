//! Connect failure classification
//!
//! Only authentication failures are retried by the connector (after a forced
//! credential refresh). Transports classify errors they understand themselves;
//! only raw protocol-library text is scanned for known markers, so addresses
//! and other context never decide the class.

/// How the connector should react to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Refresh the credential and retry
    AuthFailure,
    /// Surface to the caller without retry
    OtherFailure,
}

impl FailureClass {
    pub fn label(&self) -> &'static str {
        match self {
            FailureClass::AuthFailure => "auth_failure",
            FailureClass::OtherFailure => "other_failure",
        }
    }
}

/// Error returned by `Transport::open`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    /// Class decided by the transport; `None` for unclassified library text.
    pub class: Option<FailureClass>,
}

impl TransportError {
    /// The transport knows the endpoint rejected the credential.
    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: Some(FailureClass::AuthFailure),
        }
    }

    /// The transport knows the failure is not authentication-related
    /// (dial, resolve, timeout).
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: Some(FailureClass::OtherFailure),
        }
    }

    /// Error text from the protocol library, classified by marker scan.
    pub fn unclassified(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: None,
        }
    }
}

/// Substrings (lowercase) that mark an authentication failure.
const AUTH_MARKERS: &[&str] = &[
    "authentication",
    "gss",
    "kerberos",
    "401",
    "unauthorized",
    "credential",
];

/// Classify a failed connect attempt.
pub fn classify_failure(error: &TransportError) -> FailureClass {
    if let Some(class) = error.class {
        return class;
    }
    let lower = error.message.to_lowercase();
    if AUTH_MARKERS.iter().any(|marker| lower.contains(marker)) {
        FailureClass::AuthFailure
    } else {
        FailureClass::OtherFailure
    }
}
