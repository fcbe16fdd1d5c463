//! Gateway Link - Resilient WebSocket client for device-control gateways.
//!
//! This library keeps a single WebSocket connection to a gateway alive and
//! multiplexes many concurrent requests over it.
//!
//! # Architecture
//!
//! The client is split in two layers:
//!
//! - **Transport**: connection state machine, reconnect with backoff,
//!   cancellation of stale connect chains
//! - **Correlation**: request ids, pending table, response matching,
//!   timeouts, notification fan-out
//!
//! Key design principles:
//!
//! - Every request is settled exactly once
//! - Nothing is queued while disconnected; sends fail fast
//! - Updates with id `0` are notifications and never settle a request
//! - Event-driven architecture (no polling)
//!
//! # Quick Start
//!
//! ```no_run
//! use gateway_link::{Client, Request, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::new();
//!
//!     // Retry forever until the gateway is reachable
//!     client.connect("ws://127.0.0.1:8080", true).await?;
//!
//!     let reply = client
//!         .request(Request::new("gatt.read").param("address", "aa:bb:cc:dd:ee:ff"))
//!         .await?
//!         .into_result()?;
//!     println!("Value: {}", reply);
//!
//!     client.teardown();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`], builder and options |
//! | [`correlation`] | Request/response correlation |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types |
//! | [`transport`] | Connection state machine and sockets |

// ============================================================================
// Modules
// ============================================================================

/// Gateway client.
///
/// Use [`Client::builder()`] to create a configured client instance.
pub mod client;

/// Request/response correlation.
pub mod correlation;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Typed event listeners.
pub mod events;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire protocol message types.
pub mod protocol;

/// Connection transport layer.
///
/// State machine, reconnect backoff and the socket abstraction.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Client, ClientBuilder, ClientOptions};

// Correlation types
pub use correlation::{Correlator, RequestOptions, ResolveIf};

// Error types
pub use error::{Error, Result};

// Event types
pub use events::Subscription;

// Identifier types
pub use identifiers::{RequestId, SubscriptionId};

// Protocol types
pub use protocol::{
    CharacteristicChange, DiscoveredDevice, Message, MessageType, ParsedUpdate, RemoteError,
    Request, Response, Update,
};

// Transport types
pub use transport::{
    BackoffPolicy, ConnectionState, Connector, DisconnectEvent, RetryPolicy, Socket, SocketEvent,
    StateChange, Transport, WebSocketConnector, WireSender,
};
