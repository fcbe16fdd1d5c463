//! Socket capability consumed by the transport.
//!
//! The transport never touches a concrete socket type. A [`Connector`] opens a
//! [`Socket`]: a text sink for outbound frames plus a stream of
//! [`SocketEvent`]s. [`WebSocketConnector`] is the default implementation on
//! top of `tokio-tungstenite`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Outbound half of a socket.
pub type SocketSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Inbound half of a socket.
pub type SocketStream = Pin<Box<dyn Stream<Item = SocketEvent> + Send>>;

// ============================================================================
// SocketEvent
// ============================================================================

/// Something that happened on an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame arrived.
    Text(String),
    /// The socket reported an error.
    Error(String),
    /// The socket closed, with an optional reason.
    Closed(Option<String>),
}

// ============================================================================
// Socket
// ============================================================================

/// An open socket, split into its two halves.
pub struct Socket {
    /// Sends text frames. Closing it closes the socket.
    pub sink: SocketSink,
    /// Receives socket events. Ends when the socket is gone.
    pub stream: SocketStream,
}

impl Socket {
    /// Creates a socket from its halves.
    #[inline]
    #[must_use]
    pub fn new(sink: SocketSink, stream: SocketStream) -> Self {
        Self { sink, stream }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens sockets to a gateway URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened.
    async fn connect(&self, url: &str) -> Result<Socket>;
}

// ============================================================================
// WebSocketConnector
// ============================================================================

/// Default connector using `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Socket> {
        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| Error::connection(format!("WebSocket handshake failed: {e}")))?;

        debug!(url, status = %response.status(), "WebSocket handshake completed");

        let (ws_write, ws_read) = ws_stream.split();

        let sink = ws_write.with(|text: String| {
            future::ready(Ok::<Message, Error>(Message::Text(text.into())))
        });

        let stream = ws_read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(SocketEvent::Text(text.to_string())),
                Ok(Message::Close(frame)) => Some(SocketEvent::Closed(
                    frame.map(|frame| frame.reason.to_string()),
                )),
                Err(e) => Some(SocketEvent::Error(e.to_string())),
                // Ignore Binary, Ping, Pong, Frame
                Ok(_) => None,
            })
        });

        Ok(Socket::new(Box::pin(sink), Box::pin(stream)))
    }
}
