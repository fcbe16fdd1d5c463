//! Connection transport layer.
//!
//! This module owns the single socket to the gateway and its lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Client (Rust)  │                              │  Device         │
//! │                 │         WebSocket            │  Gateway        │
//! │  Transport      │◄────────────────────────────►│                 │
//! │  → Socket       │      ws://host:port          │  WebSocket      │
//! │                 │                              │  Server         │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Transport::connect` - Tear down, enter Connecting, open a socket
//! 2. Socket opens - Connected, Connect event, session loop starts
//! 3. Socket drops - Disconnect event, backoff, retry (per [`RetryPolicy`])
//! 4. `Transport::teardown` - Cancel everything, Disconnected, Teardown event
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `backoff` | Retry policy and linear backoff |
//! | `connection` | Transport state machine and event loop |
//! | `socket` | Socket capability and WebSocket connector |
//! | `state` | Connection state and event payloads |

// ============================================================================
// Submodules
// ============================================================================

/// Retry policy and linear backoff.
pub mod backoff;

/// Transport state machine and event loop.
pub mod connection;

/// Socket capability and the default WebSocket connector.
pub mod socket;

/// Connection state and event payloads.
pub mod state;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::{Backoff, BackoffPolicy, DEFAULT_BACKOFF_MAX, DEFAULT_BACKOFF_STEP, RetryPolicy};
pub use connection::{DEFAULT_CONNECT_TIMEOUT, Transport, WireSender};
pub use socket::{Connector, Socket, SocketEvent, SocketSink, SocketStream, WebSocketConnector};
pub use state::{ConnectionState, DisconnectEvent, StateChange};
