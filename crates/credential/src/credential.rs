//! The credential value
//!
//! A `Credential` is one acquired authentication grant. It is never mutated:
//! renewal and re-login produce a new value that replaces the old one wholesale.
//! Expiry is tracked as a monotonic `tokio::time::Instant` so that schedule
//! arithmetic is immune to wall-clock jumps.

use std::time::Duration;

use common::Secret;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// One acquired ticket-granting credential.
#[derive(Debug)]
pub struct Credential {
    subject: String,
    issued_at: Instant,
    expires_at: Instant,
    renewable: bool,
    renew_until: Option<Instant>,
    /// Opaque material the transport needs to authenticate (for the kinit
    /// provider this is the credential cache name).
    handle: Secret<Vec<u8>>,
}

impl Credential {
    /// Build a non-renewable credential.
    ///
    /// Fails with `Expired` if `expires_at` is not strictly in the future.
    pub fn new(subject: impl Into<String>, expires_at: Instant, handle: Vec<u8>) -> Result<Self> {
        let subject = subject.into();
        let now = Instant::now();
        if expires_at <= now {
            return Err(Error::Expired(format!(
                "credential for {subject} expired before it was issued"
            )));
        }
        Ok(Self {
            subject,
            issued_at: now,
            expires_at,
            renewable: false,
            renew_until: None,
            handle: Secret::new(handle),
        })
    }

    /// Mark the credential renewable, optionally up to a renewal limit.
    pub fn with_renewal(mut self, renew_until: Option<Instant>) -> Self {
        self.renewable = true;
        self.renew_until = renew_until;
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn renewable(&self) -> bool {
        self.renewable
    }

    pub fn renew_until(&self) -> Option<Instant> {
        self.renew_until
    }

    pub fn handle(&self) -> &Secret<Vec<u8>> {
        &self.handle
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Remaining lifetime, zero once expired.
    pub fn time_to_expiry(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Renewable and still inside its renewal window.
    pub fn can_renew(&self) -> bool {
        if !self.renewable || self.is_expired() {
            return false;
        }
        match self.renew_until {
            Some(limit) => Instant::now() < limit,
            None => true,
        }
    }
}
