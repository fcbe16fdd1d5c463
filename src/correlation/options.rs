//! Per-request options.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use gateway_link::RequestOptions;
//!
//! let options = RequestOptions::new()
//!     .with_timeout(Duration::from_secs(10))
//!     .with_resolve_if(|message| message.get_str("name") == Some("thermo"));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::protocol::Message;

// ============================================================================
// Types
// ============================================================================

/// Predicate deciding whether a message with the request's id settles it.
pub type ResolveIf = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

// ============================================================================
// RequestOptions
// ============================================================================

/// Options for [`Correlator::issue_request`](super::Correlator::issue_request).
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Deadline for settlement. Falls back to the correlator default.
    pub timeout: Option<Duration>,

    /// Swallow failures: the call resolves to `Ok(None)` instead of `Err`.
    pub quiet: bool,

    /// Settle only on a message satisfying this predicate.
    pub resolve_if: Option<ResolveIf>,
}

impl RequestOptions {
    /// Creates default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the settlement deadline.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Makes failures resolve to `Ok(None)`.
    #[inline]
    #[must_use]
    pub fn with_quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Sets the settlement predicate.
    #[must_use]
    pub fn with_resolve_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.resolve_if = Some(Arc::new(predicate));
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("timeout", &self.timeout)
            .field("quiet", &self.quiet)
            .field("resolve_if", &self.resolve_if.is_some())
            .finish()
    }
}
