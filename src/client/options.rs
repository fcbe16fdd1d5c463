//! Client configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use gateway_link::ClientOptions;
//!
//! let options = ClientOptions::new()
//!     .with_connect_timeout(Duration::from_secs(5))
//!     .with_request_timeout(Duration::from_secs(10))
//!     .with_max_pending_requests(64);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::correlation::{DEFAULT_MAX_PENDING_REQUESTS, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{Error, Result};
use crate::transport::{BackoffPolicy, DEFAULT_CONNECT_TIMEOUT};

// ============================================================================
// ClientOptions
// ============================================================================

/// Tunables shared by the transport and correlation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Reconnect delay schedule.
    pub backoff: BackoffPolicy,

    /// Deadline for a single connection attempt.
    pub connect_timeout: Duration,

    /// Default request deadline. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,

    /// Maximum concurrently pending requests.
    pub max_pending_requests: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reconnect delay schedule.
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the per-attempt connect deadline.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the default request deadline.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Lets requests without their own deadline wait indefinitely.
    #[inline]
    #[must_use]
    pub fn without_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    /// Sets the pending request limit.
    #[inline]
    #[must_use]
    pub fn with_max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientOptions {
    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.backoff.validate()?;

        if self.connect_timeout.is_zero() {
            return Err(Error::config("Connect timeout must be > 0"));
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::config("Request timeout must be > 0"));
        }
        if self.max_pending_requests == 0 {
            return Err(Error::config("Max pending requests must be > 0"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
