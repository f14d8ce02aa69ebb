//! Lifecycle of an established connection.

use std::sync::atomic::{AtomicU8, Ordering};

/// Where an established connection stands. A connection only exists once
/// the handshake succeeded, so it starts out `Ready` and ends exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Authenticated and dispatching broker frames.
    Ready,
    /// The broker hung up or the transport failed.
    Lost,
    /// Closed locally.
    Disconnected,
}

impl ConnectionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Ready,
            1 => Self::Lost,
            _ => Self::Disconnected,
        }
    }

    /// Whether commands can still be sent.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Ready until the first `finish`; later ones are ignored.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn ready() -> Self {
        Self(AtomicU8::new(ConnectionState::Ready as u8))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves out of `Ready`. Returns `false` if the connection had already ended.
    pub(crate) fn finish(&self, end: ConnectionState) -> bool {
        self.0
            .compare_exchange(
                ConnectionState::Ready as u8,
                end as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
