//! Connection state of one backend.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a backend connection.
///
/// ```text
/// Disconnected ──▶ Connecting ──▶ Ready ──▶ Degraded
///      ▲               │                      │
///      └───── failure ─┘◀──── reconnect ──────┘
/// ```
///
/// Only `Ready` accepts new calls. Any state moves to `Closed` on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Ready,
    Degraded,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Closed => "closed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Ready => 2,
            ConnectionState::Degraded => 3,
            ConnectionState::Closed => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Ready,
            3 => ConnectionState::Degraded,
            4 => ConnectionState::Closed,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free cell holding a [`ConnectionState`].
#[derive(Debug, Default)]
pub struct AtomicConnectionState(std::sync::atomic::AtomicU8);

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self(std::sync::atomic::AtomicU8::new(state.to_u8()))
    }

    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(std::sync::atomic::Ordering::Acquire))
    }

    /// Store `state` and return the previous one.
    pub fn swap(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(state.to_u8(), std::sync::atomic::Ordering::AcqRel))
    }

    /// Move to `next` unless the current state is `Closed`.
    ///
    /// Returns the previous state, or `None` when already closed.
    pub fn transition(&self, next: ConnectionState) -> Option<ConnectionState> {
        let closed = ConnectionState::Closed.to_u8();
        self.0
            .fetch_update(
                std::sync::atomic::Ordering::AcqRel,
                std::sync::atomic::Ordering::Acquire,
                |current| (current != closed).then_some(next.to_u8()),
            )
            .ok()
            .map(ConnectionState::from_u8)
    }
}
