//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`Client`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use gateway_link::Client;
//!
//! # fn example() -> gateway_link::Result<()> {
//! let client = Client::builder()
//!     .backoff_step(Duration::from_millis(500))
//!     .max_backoff(Duration::from_secs(5))
//!     .request_timeout(Duration::from_secs(10))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::transport::{BackoffPolicy, Connector, WebSocketConnector};

use super::core::Client;
use super::options::ClientOptions;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`] instance.
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ClientBuilder {
    /// Socket factory. Defaults to [`WebSocketConnector`].
    connector: Option<Arc<dyn Connector>>,
    /// Collected settings.
    options: ClientOptions,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("custom_connector", &self.connector.is_some())
            .field("options", &self.options)
            .finish()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the socket factory.
    ///
    /// # Arguments
    ///
    /// * `connector` - Opens sockets for each connection attempt
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replaces all settings at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the backoff increment per consecutive failure.
    #[inline]
    #[must_use]
    pub fn backoff_step(mut self, step: Duration) -> Self {
        self.options.backoff.step = step;
        self
    }

    /// Sets the upper bound for one backoff delay.
    #[inline]
    #[must_use]
    pub fn max_backoff(mut self, max: Duration) -> Self {
        self.options.backoff.max = max;
        self
    }

    /// Sets the full backoff policy.
    #[inline]
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.options.backoff = backoff;
        self
    }

    /// Sets the per-attempt connect deadline.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Sets the default request deadline.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = Some(timeout);
        self
    }

    /// Lets requests without their own deadline wait indefinitely.
    #[inline]
    #[must_use]
    pub fn no_request_timeout(mut self) -> Self {
        self.options.request_timeout = None;
        self
    }

    /// Sets the pending request limit.
    #[inline]
    #[must_use]
    pub fn max_pending_requests(mut self, max: usize) -> Self {
        self.options.max_pending_requests = max;
        self
    }

    /// Builds the client with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if any setting is unusable
    pub fn build(self) -> Result<Client> {
        self.options.validate()?;

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector));

        Ok(Client::from_parts(connector, &self.options))
    }
}

// ============================================================================
// Tests
// ============================================================================
