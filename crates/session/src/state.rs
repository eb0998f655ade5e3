//! Connection state machine
//!
//! ```text
//! Disconnected --connect()--> Connecting
//! Connecting   --success----> Connected
//! Connecting   --failure----> Failed
//! Connected    --drop-------> Reconnecting --> Connecting
//! any          --disconnect()--> Disconnected
//! ```
//!
//! The state is a single `AtomicU8`; every transition is a compare-and-swap
//! from an expected state, so concurrent `connect()` calls cannot both win.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Failed = 4,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// States from which `connect()` may start a new attempt.
const CONNECTABLE: &[ConnectionState] = &[
    ConnectionState::Disconnected,
    ConnectionState::Failed,
    ConnectionState::Reconnecting,
];

/// Atomic holder for a `ConnectionState`.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move `from -> to` only if the current state is `from`.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `to` from the first of `from` that matches. Returns the old state.
    pub(crate) fn transition_any(
        &self,
        from: &[ConnectionState],
        to: ConnectionState,
    ) -> Option<ConnectionState> {
        from.iter().copied().find(|state| self.transition(*state, to))
    }

    /// Claim the right to connect. `None` when already connecting or connected.
    pub(crate) fn begin_connect(&self) -> Option<ConnectionState> {
        self.transition_any(CONNECTABLE, ConnectionState::Connecting)
    }
}
