//! Transport state machine and connection event loop.
//!
//! The [`Transport`] owns at most one socket at a time. A call to
//! [`Transport::connect`] spawns a connect chain task that opens the socket,
//! runs the session loop, and reconnects with backoff as the retry policy
//! allows.
//!
//! # Event Loop
//!
//! While connected, the chain task selects over:
//!
//! - Cancellation of the chain (teardown or a newer connect)
//! - Incoming socket events (text frames, errors, close)
//! - Outgoing frames queued by [`Transport::send`]
//!
//! # Generations
//!
//! Every teardown bumps a generation counter and swaps in a fresh
//! cancellation token. A chain only mutates state while its generation is
//! current, so a superseded chain can never touch a newer connection.

// ============================================================================
// Imports
// ============================================================================

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::events::{Listeners, Subscription};
use crate::protocol::parse_inbound;

use super::backoff::{Backoff, BackoffPolicy, RetryPolicy};
use super::socket::{Connector, Socket, SocketEvent};
use super::state::{ConnectionState, DisconnectEvent, StateChange};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// WireSender
// ============================================================================

/// Narrow send capability the correlation layer depends on.
pub trait WireSender: Send + Sync + 'static {
    /// Sends one JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the payload cannot go on the wire now.
    fn send(&self, payload: &Value) -> Result<()>;
}

// ============================================================================
// Internal Types
// ============================================================================

/// Commands for the session loop.
enum Outbound {
    /// Send a text frame.
    Text(String),
    /// Close the socket.
    Close,
}

/// How a session loop ended.
enum SessionEnd {
    /// The chain was cancelled; nothing more to do.
    Cancelled,
    /// The socket closed or failed.
    Closed(Option<String>),
}

/// Mutable transport state.
struct Shared {
    /// Current state.
    state: ConnectionState,
    /// Bumped on every teardown.
    generation: u64,
    /// Token for the current connect chain.
    cancel: CancellationToken,
    /// Outbound channel of the live session.
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    /// URL of the current connect chain.
    url: Option<String>,
}

/// Event registries.
#[derive(Default)]
struct TransportEvents {
    connect: Listeners<String>,
    disconnect: Listeners<DisconnectEvent>,
    state_change: Listeners<StateChange>,
    teardown: Listeners<()>,
    raw_data: Listeners<Value>,
    error: Listeners<Error>,
}

/// Shared inner state of a transport.
struct TransportInner {
    connector: Arc<dyn Connector>,
    backoff: BackoffPolicy,
    connect_timeout: Duration,
    shared: Mutex<Shared>,
    events: TransportEvents,
}

// ============================================================================
// Transport
// ============================================================================

/// Tears the transport down once the last handle is gone.
///
/// Held only by [`Transport`] handles, never by the connect chain task, so a
/// running chain does not keep it alive.
struct HandleGuard {
    inner: Arc<TransportInner>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        debug!("Last transport handle dropped");
        self.inner.teardown();
    }
}

/// Single-connection transport with reconnect and cancellation.
///
/// Cloning is cheap; clones share the same connection. Dropping the last
/// clone tears the connection down and stops any retry loop.
///
/// # Example
///
/// ```ignore
/// let transport = Transport::new(Arc::new(WebSocketConnector));
/// transport.connect("ws://127.0.0.1:8080", RetryPolicy::Limited(3)).await?;
/// transport.send(&serde_json::json!({ "hello": "gateway" }))?;
/// transport.teardown();
/// ```
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
    _guard: Arc<HandleGuard>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("Transport")
            .field("state", &shared.state)
            .field("generation", &shared.generation)
            .field("url", &shared.url)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Transport - Constructor
// ============================================================================

impl Transport {
    /// Creates a disconnected transport with default backoff and timeout.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_options(connector, BackoffPolicy::default(), DEFAULT_CONNECT_TIMEOUT)
    }

    /// Creates a disconnected transport.
    #[must_use]
    pub fn with_options(
        connector: Arc<dyn Connector>,
        backoff: BackoffPolicy,
        connect_timeout: Duration,
    ) -> Self {
        let inner = Arc::new(TransportInner {
            connector,
            backoff,
            connect_timeout,
            shared: Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                generation: 0,
                cancel: CancellationToken::new(),
                outbound: None,
                url: None,
            }),
            events: TransportEvents::default(),
        });

        Self {
            _guard: Arc::new(HandleGuard {
                inner: Arc::clone(&inner),
            }),
            inner,
        }
    }
}

// ============================================================================
// Transport - Control
// ============================================================================

impl Transport {
    /// Connects to the gateway.
    ///
    /// Tears down any existing connection first. Resolves once a connection
    /// opens; later drops are handled in the background per `retry`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if `url` is not a `ws`/`wss` URL
    /// - [`Error::ConnectFailed`] if every permitted attempt failed
    /// - [`Error::Aborted`] if torn down before a connection opened
    pub async fn connect(&self, url: &str, retry: RetryPolicy) -> Result<()> {
        let url = validate_url(url)?;

        self.teardown();

        let (token, generation) = {
            let mut shared = self.inner.shared.lock();
            shared.url = Some(url.clone());
            (shared.cancel.clone(), shared.generation)
        };

        info!(%url, ?retry, generation, "Connecting to gateway");

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(&self.inner).run_connect_chain(
            url, retry, token, generation, done_tx,
        ));

        done_rx.await.unwrap_or(Err(Error::Aborted))
    }

    /// Closes the connection and cancels any connect in progress.
    ///
    /// Safe to call in any state, any number of times.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Returns the URL of the active connect chain.
    ///
    /// `None` after teardown or once the chain has given up.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.inner.shared.lock().url.clone()
    }

    /// Sends a JSON payload.
    ///
    /// This is a precondition check, not a queue: nothing is buffered while
    /// disconnected.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] unless the state is Connected
    /// - [`Error::Json`] if the payload cannot be serialized
    pub fn send(&self, payload: &Value) -> Result<()> {
        let shared = self.inner.shared.lock();
        if !shared.state.is_connected() {
            return Err(Error::NotConnected);
        }
        let outbound = shared.outbound.as_ref().ok_or(Error::NotConnected)?;

        let text = serde_json::to_string(payload)?;
        outbound
            .send(Outbound::Text(text))
            .map_err(|_| Error::NotConnected)
    }
}

impl WireSender for Transport {
    fn send(&self, payload: &Value) -> Result<()> {
        Transport::send(self, payload)
    }
}

// ============================================================================
// Transport - Subscriptions
// ============================================================================

impl Transport {
    /// Called with the URL whenever a connection opens.
    pub fn on_connect<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.inner.events.connect.subscribe(callback)
    }

    /// Called whenever a connection closes or an attempt fails.
    pub fn on_disconnect<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DisconnectEvent) + Send + Sync + 'static,
    {
        self.inner.events.disconnect.subscribe(callback)
    }

    /// Called on every state transition.
    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.inner.events.state_change.subscribe(callback)
    }

    /// Called on every teardown.
    pub fn on_teardown<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.inner.events.teardown.subscribe(callback)
    }

    /// Called with every well-formed inbound JSON object.
    pub fn on_raw_data<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.raw_data.subscribe(callback)
    }

    /// Called with connection-level errors.
    pub fn on_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.events.error.subscribe(callback)
    }
}

// ============================================================================
// TransportInner - Teardown and State Transitions
// ============================================================================

impl TransportInner {
    /// Bumps the generation, cancels the chain and closes the socket.
    fn teardown(&self) {
        let (previous, outbound, old_token, generation) = {
            let mut shared = self.shared.lock();
            shared.generation += 1;
            let old_token = mem::replace(&mut shared.cancel, CancellationToken::new());
            let previous = mem::replace(&mut shared.state, ConnectionState::Disconnected);
            shared.url = None;
            (
                previous,
                shared.outbound.take(),
                old_token,
                shared.generation,
            )
        };

        old_token.cancel();
        if let Some(outbound) = outbound {
            let _ = outbound.send(Outbound::Close);
        }

        debug!(generation, %previous, "Transport torn down");

        if previous != ConnectionState::Disconnected {
            self.events.state_change.emit(&StateChange {
                previous,
                current: ConnectionState::Disconnected,
            });
        }
        self.events.teardown.emit(&());
    }

    /// Moves to `next` if `generation` is current.
    ///
    /// Returns `false` if the chain has been superseded.
    fn transition(&self, generation: u64, next: ConnectionState) -> bool {
        let previous = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return false;
            }
            if next != ConnectionState::Connected {
                shared.outbound = None;
            }
            if next == ConnectionState::Disconnected {
                shared.url = None;
            }
            mem::replace(&mut shared.state, next)
        };

        if previous != next {
            trace!(%previous, current = %next, "State change");
            self.events.state_change.emit(&StateChange {
                previous,
                current: next,
            });
        }
        true
    }

    /// Installs the outbound channel and moves to Connected.
    fn mark_connected(&self, generation: u64, outbound: mpsc::UnboundedSender<Outbound>) -> bool {
        let previous = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return false;
            }
            shared.outbound = Some(outbound);
            mem::replace(&mut shared.state, ConnectionState::Connected)
        };

        self.events.state_change.emit(&StateChange {
            previous,
            current: ConnectionState::Connected,
        });
        true
    }

    /// Returns `true` if `generation` is still the current one.
    #[inline]
    fn is_current(&self, generation: u64) -> bool {
        self.shared.lock().generation == generation
    }
}

// ============================================================================
// TransportInner - Connect Chain
// ============================================================================

impl TransportInner {
    /// Runs one connect call: attempts, session, reconnects.
    async fn run_connect_chain(
        self: Arc<Self>,
        url: String,
        retry: RetryPolicy,
        token: CancellationToken,
        generation: u64,
        done_tx: oneshot::Sender<Result<()>>,
    ) {
        let mut done_tx = Some(done_tx);
        let mut backoff = Backoff::new(self.backoff);
        let mut retries: u32 = 0;

        loop {
            if !self.transition(generation, ConnectionState::Connecting) {
                Self::finish(&mut done_tx, Err(Error::Aborted));
                return;
            }

            let attempt = tokio::select! {
                biased;
                () = token.cancelled() => {
                    Self::finish(&mut done_tx, Err(Error::Aborted));
                    return;
                }
                result = timeout(self.connect_timeout, self.connector.connect(&url)) => {
                    result.unwrap_or_else(|_| {
                        Err(Error::connection_timeout(self.connect_timeout.as_millis() as u64))
                    })
                }
            };

            let failure = match attempt {
                Ok(socket) => {
                    backoff.reset();
                    retries = 0;

                    match self.run_connected(socket, &url, &token, generation, &mut done_tx).await {
                        SessionEnd::Cancelled => {
                            Self::finish(&mut done_tx, Err(Error::Aborted));
                            return;
                        }
                        SessionEnd::Closed(reason) => {
                            info!(%url, ?reason, "Gateway connection closed");
                            (reason, Error::ConnectionClosed)
                        }
                    }
                }
                Err(e) => {
                    if token.is_cancelled() {
                        Self::finish(&mut done_tx, Err(Error::Aborted));
                        return;
                    }
                    warn!(%url, attempt = retries + 1, error = %e, "Connection attempt failed");
                    self.events.error.emit(&e);
                    (Some(e.to_string()), e)
                }
            };

            let (reason, last_error) = failure;
            let will_retry = retry.allows(retries);

            if !self.is_current(generation) {
                Self::finish(&mut done_tx, Err(Error::Aborted));
                return;
            }
            self.events.disconnect.emit(&DisconnectEvent {
                url: url.clone(),
                reason,
                will_retry,
            });

            if !will_retry {
                self.transition(generation, ConnectionState::Disconnected);
                if done_tx.is_some() {
                    error!(%url, attempts = retries + 1, "Giving up on gateway connection");
                } else {
                    info!(%url, "Connection lost; not reconnecting");
                }
                Self::finish(&mut done_tx, Err(Error::connect_failed(retries + 1, last_error)));
                return;
            }

            if !self.transition(generation, ConnectionState::Connecting) {
                Self::finish(&mut done_tx, Err(Error::Aborted));
                return;
            }

            retries += 1;
            let delay = backoff.next_delay();
            info!(%url, retry = retries, delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");

            tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!(%url, "Backoff wait cancelled");
                    Self::finish(&mut done_tx, Err(Error::Aborted));
                    return;
                }
                () = sleep(delay) => {}
            }
        }
    }

    /// Completes the caller's connect future, at most once.
    fn finish(done_tx: &mut Option<oneshot::Sender<Result<()>>>, result: Result<()>) {
        if let Some(tx) = done_tx.take() {
            let _ = tx.send(result);
        }
    }

    /// Marks the transport connected and runs the session loop.
    async fn run_connected(
        &self,
        socket: Socket,
        url: &str,
        token: &CancellationToken,
        generation: u64,
        done_tx: &mut Option<oneshot::Sender<Result<()>>>,
    ) -> SessionEnd {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        if !self.mark_connected(generation, outbound_tx) {
            let mut sink = socket.sink;
            let _ = sink.close().await;
            return SessionEnd::Cancelled;
        }

        info!(%url, generation, "Gateway connection established");
        self.events.connect.emit(&url.to_string());
        Self::finish(done_tx, Ok(()));

        self.run_session(socket, outbound_rx, token, generation).await
    }

    /// Event loop for one open socket.
    async fn run_session(
        &self,
        socket: Socket,
        mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
        token: &CancellationToken,
        generation: u64,
    ) -> SessionEnd {
        let Socket {
            mut sink,
            mut stream,
        } = socket;

        loop {
            tokio::select! {
                biased;

                () = token.cancelled() => {
                    debug!("Session cancelled");
                    let _ = sink.close().await;
                    return SessionEnd::Cancelled;
                }

                event = stream.next() => {
                    match event {
                        Some(SocketEvent::Text(text)) => {
                            self.handle_inbound(&text, generation);
                        }

                        Some(SocketEvent::Error(message)) => {
                            warn!(error = %message, "Socket error");
                            if self.is_current(generation) {
                                self.events.error.emit(&Error::connection(message));
                            }
                        }

                        Some(SocketEvent::Closed(reason)) => {
                            debug!(?reason, "Socket closed by remote");
                            return SessionEnd::Closed(reason);
                        }

                        None => {
                            debug!("Socket stream ended");
                            return SessionEnd::Closed(None);
                        }
                    }
                }

                command = outbound_rx.recv() => {
                    match command {
                        Some(Outbound::Text(text)) => {
                            if let Err(e) = sink.send(text).await {
                                warn!(error = %e, "Failed to send frame");
                                let reason = e.to_string();
                                if self.is_current(generation) {
                                    self.events.error.emit(&e);
                                }
                                return SessionEnd::Closed(Some(reason));
                            }
                        }

                        Some(Outbound::Close) | None => {
                            debug!("Close requested");
                            let _ = sink.close().await;
                            return SessionEnd::Cancelled;
                        }
                    }
                }
            }
        }
    }

    /// Filters a text frame and publishes it as raw data.
    fn handle_inbound(&self, text: &str, generation: u64) {
        let value = match parse_inbound(text) {
            Ok(value) => value,
            Err(e) => {
                trace!(error = %e, "Dropping inbound frame");
                return;
            }
        };

        if !self.is_current(generation) {
            trace!("Dropping frame from superseded connection");
            return;
        }

        self.events.raw_data.emit(&value);
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Checks that `url` is a usable WebSocket URL.
fn validate_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| Error::invalid_url(url, e.to_string()))?;

    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed.to_string()),
        scheme => Err(Error::invalid_url(
            url,
            format!("unsupported scheme '{scheme}'"),
        )),
    }
}

// ============================================================================
// Tests
// ============================================================================
