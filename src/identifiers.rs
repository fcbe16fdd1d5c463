//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing request ids with other integers.
//!
//! | Type | Scope |
//! |------|-------|
//! | [`RequestId`] | Correlates a request with its responses (wire value) |
//! | [`RequestIdCounter`] | Per-client id source with wraparound |
//! | [`SubscriptionId`] | Identifies one registered event listener |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Request ids are taken modulo this bound.
pub const REQUEST_ID_MODULUS: u32 = 1_000_000_000;

// ============================================================================
// RequestId
// ============================================================================

/// Identifier carried by every request, response and update.
///
/// `0` marks unsolicited messages and is never assigned to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u32);

impl RequestId {
    /// Id of unsolicited (out-of-band) messages.
    pub const UNSOLICITED: Self = Self(0);

    /// Creates a request id, returning `None` for the reserved value `0`.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Option<Self> {
        if id == 0 { None } else { Some(Self(id)) }
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns `true` for the unsolicited id `0`.
    #[inline]
    #[must_use]
    pub const fn is_unsolicited(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// RequestIdCounter
// ============================================================================

/// Monotonic request id source.
///
/// Yields `1, 2, ..., 999_999_999, 1, ...`. Never yields `0`.
#[derive(Debug, Default, Clone)]
pub struct RequestIdCounter {
    last: u32,
}

impl RequestIdCounter {
    /// Creates a counter whose first id is `1`.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    /// Returns the next id.
    pub fn next_id(&mut self) -> RequestId {
        let mut next = (self.last + 1) % REQUEST_ID_MODULUS;
        if next == 0 {
            next = 1;
        }
        self.last = next;
        RequestId(next)
    }

    /// Restarts the sequence at `1`.
    #[inline]
    pub fn reset(&mut self) {
        self.last = 0;
    }

    /// Creates a counter that continues after `last`.
    #[cfg(test)]
    pub(crate) const fn resume_after(last: u32) -> Self {
        Self { last }
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Global counter for subscription ids.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a registered event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Allocates a fresh process-unique id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
