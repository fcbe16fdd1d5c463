//! Connection state and lifecycle event payloads.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// ConnectionState
// ============================================================================

/// State of the transport's single connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected,
    /// An attempt (or a backoff wait before one) is in progress.
    Connecting,
    /// The connection is open; sends are accepted.
    Connected,
}

impl ConnectionState {
    /// Returns `true` if sends are accepted.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

// ============================================================================
// StateChange
// ============================================================================

/// Published on every state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State before the transition.
    pub previous: ConnectionState,
    /// State after the transition.
    pub current: ConnectionState,
}

// ============================================================================
// DisconnectEvent
// ============================================================================

/// Published when a connection closes or an attempt fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectEvent {
    /// Gateway URL.
    pub url: String,
    /// Close reason or attempt error, if known.
    pub reason: Option<String>,
    /// Whether another attempt will follow.
    pub will_retry: bool,
}

// ============================================================================
// Tests
// ============================================================================
