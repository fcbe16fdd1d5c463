//! Request/response correlation layer.
//!
//! Many logical requests share one socket. Each request gets an id, waits in
//! the pending table, and is settled exactly once: by a matching message, by
//! its timeout, or by teardown.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `correlator` | Request issuance and inbound routing |
//! | `options` | Per-request options |
//! | `pending` | Pending table and drop guard (internal) |

// ============================================================================
// Submodules
// ============================================================================

/// Request issuance and inbound routing.
pub mod correlator;

/// Per-request options.
pub mod options;

mod pending;

// ============================================================================
// Re-exports
// ============================================================================

pub use correlator::{Correlator, DEFAULT_MAX_PENDING_REQUESTS, DEFAULT_REQUEST_TIMEOUT};
pub use options::{RequestOptions, ResolveIf};

pub(crate) use correlator::WeakCorrelator;
