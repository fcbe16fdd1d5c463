//! Gateway wire protocol message types.
//!
//! This module defines the JSON envelopes exchanged with the gateway.
//!
//! # Protocol Overview
//!
//! | Message Type | `type` tag | Direction | Purpose |
//! |--------------|------------|-----------|---------|
//! | `Request` | `REQ` | Local → Gateway | Command request |
//! | `Response` | `RESP` | Gateway → Local | Command result or error |
//! | `Update` | `UPDATE` | Gateway → Local | Progress for a request, or unsolicited notification when `id == 0` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | Request, Response, Update envelopes and inbound parsing |
//! | `update` | Typed views of update payloads |

// ============================================================================
// Submodules
// ============================================================================

/// Request, Response and Update envelopes.
pub mod message;

/// Typed update payloads.
pub mod update;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{
    Message, MessageType, RemoteError, Request, RequestEnvelope, Response, Update, parse_inbound,
};
pub use update::{CharacteristicChange, DiscoveredDevice, ParsedUpdate, UpdateKind};
