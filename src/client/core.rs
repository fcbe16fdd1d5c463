//! Client: one transport plus one correlator.
//!
//! The client owns the wiring between the two layers:
//!
//! | Transport event | Correlator action |
//! |-----------------|-------------------|
//! | raw data | [`Correlator::route_incoming`] |
//! | disconnect | [`Correlator::fail_all_closed`] |
//! | teardown | [`Correlator::abort_all`] |
//!
//! The wiring holds only weak references to the correlator, so dropping the
//! last [`Client`] handle frees everything and stops the background task.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::correlation::{Correlator, RequestOptions, WeakCorrelator};
use crate::error::{Error, Result};
use crate::events::Subscription;
use crate::protocol::{CharacteristicChange, DiscoveredDevice, Message, Request, Update};
use crate::transport::{
    ConnectionState, Connector, DisconnectEvent, RetryPolicy, StateChange, Transport,
    WebSocketConnector, WireSender,
};

use super::builder::ClientBuilder;
use super::options::ClientOptions;

// ============================================================================
// Types
// ============================================================================

/// Shared inner state of a client.
struct ClientInner {
    transport: Transport,
    correlator: Correlator,
    /// Layer wiring; removed when the client goes away.
    _wiring: Vec<Subscription>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        debug!("Client dropped, tearing down transport");
        self.transport.teardown();
    }
}

// ============================================================================
// Client
// ============================================================================

/// Resilient gateway client.
///
/// Cloning is cheap; clones share the connection. The connection is torn
/// down when the last clone is dropped.
///
/// # Example
///
/// ```no_run
/// use gateway_link::{Client, Request};
///
/// # async fn example() -> gateway_link::Result<()> {
/// let client = Client::new();
/// client.connect("ws://127.0.0.1:8080", true).await?;
///
/// let reply = client.request(Request::new("adapter.info")).await?;
/// println!("{}", reply.results());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.inner.transport)
            .field("correlator", &self.inner.correlator)
            .finish()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Client - Constructors
// ============================================================================

impl Client {
    /// Creates a client with default settings over WebSocket.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(Arc::new(WebSocketConnector), &ClientOptions::default())
    }

    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Assembles a client from validated options.
    pub(crate) fn from_parts(connector: Arc<dyn Connector>, options: &ClientOptions) -> Self {
        let transport =
            Transport::with_options(connector, options.backoff, options.connect_timeout);
        let correlator = Correlator::with_options(
            Arc::new(transport.clone()) as Arc<dyn WireSender>,
            options.request_timeout,
            options.max_pending_requests,
        );

        let wiring = wire(&transport, correlator.downgrade());

        Self {
            inner: Arc::new(ClientInner {
                transport,
                correlator,
                _wiring: wiring,
            }),
        }
    }
}

/// Connects transport events to the correlator.
fn wire(transport: &Transport, correlator: WeakCorrelator) -> Vec<Subscription> {
    let routing = correlator.clone();
    let closing = correlator.clone();
    let aborting = correlator;

    vec![
        transport.on_raw_data(move |value: &Value| {
            if let Some(correlator) = routing.upgrade() {
                correlator.route_incoming(value);
            }
        }),
        transport.on_disconnect(move |_: &DisconnectEvent| {
            if let Some(correlator) = closing.upgrade() {
                correlator.fail_all_closed();
            }
        }),
        transport.on_teardown(move |_| {
            if let Some(correlator) = aborting.upgrade() {
                correlator.abort_all();
            }
        }),
    ]
}

// ============================================================================
// Client - Connection
// ============================================================================

impl Client {
    /// Connects to the gateway at `url`.
    ///
    /// `retry` accepts a [`RetryPolicy`], a `bool` (retry forever or never)
    /// or a `u32` retry count.
    ///
    /// # Errors
    ///
    /// See [`Transport::connect`].
    pub async fn connect(&self, url: &str, retry: impl Into<RetryPolicy>) -> Result<()> {
        self.inner.transport.connect(url, retry.into()).await
    }

    /// Closes the connection and rejects every pending request with
    /// [`Error::Aborted`].
    pub fn teardown(&self) {
        self.inner.transport.teardown();
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    /// Returns the URL of the active connection, if any.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.inner.transport.url()
    }
}

// ============================================================================
// Client - Requests
// ============================================================================

impl Client {
    /// Sends a request with explicit options.
    ///
    /// # Errors
    ///
    /// See [`Correlator::issue_request`].
    pub async fn issue_request(
        &self,
        request: Request,
        options: RequestOptions,
    ) -> Result<Option<Message>> {
        self.inner.correlator.issue_request(request, options).await
    }

    /// Sends a request with default options and waits for its answer.
    ///
    /// Gateway error objects arrive as a settled [`Message`]; use
    /// [`Message::into_result`] to turn them into [`Error::Remote`].
    ///
    /// # Errors
    ///
    /// See [`Correlator::issue_request`].
    pub async fn request(&self, request: Request) -> Result<Message> {
        self.inner
            .correlator
            .exchange(request, RequestOptions::default())
            .await
    }

    /// Returns the number of requests awaiting an answer.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.correlator.pending_count()
    }
}

// ============================================================================
// Client - Subscriptions
// ============================================================================

impl Client {
    /// Called with the URL whenever a connection opens.
    pub fn on_connect<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.inner.transport.on_connect(callback)
    }

    /// Called whenever a connection closes or an attempt fails.
    pub fn on_disconnect<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DisconnectEvent) + Send + Sync + 'static,
    {
        self.inner.transport.on_disconnect(callback)
    }

    /// Called on every state transition.
    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.inner.transport.on_state_change(callback)
    }

    /// Called on every teardown.
    pub fn on_teardown<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.inner.transport.on_teardown(callback)
    }

    /// Called with every well-formed inbound JSON object.
    pub fn on_raw_data<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.transport.on_raw_data(callback)
    }

    /// Called with every message routed to a pending request.
    pub fn on_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.correlator.on_update(callback)
    }

    /// Called with every unsolicited update.
    pub fn on_notification<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        self.inner.correlator.on_notification(callback)
    }

    /// Called with every unsolicited characteristic change.
    pub fn on_characteristic_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CharacteristicChange) + Send + Sync + 'static,
    {
        self.inner.correlator.on_characteristic_changed(callback)
    }

    /// Called with every device named by a scan result.
    pub fn on_device_discovered<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DiscoveredDevice) + Send + Sync + 'static,
    {
        self.inner.correlator.on_device_discovered(callback)
    }

    /// Called with connection-level errors that did not fail a request.
    pub fn on_transport_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.transport.on_error(callback)
    }
}

// ============================================================================
// Tests
// ============================================================================
