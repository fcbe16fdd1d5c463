//! In-memory connector for tests.
//!
//! Each accepted connection hands the test a [`MockPeer`] that sees every
//! frame the client sends and can push frames, errors or a close back.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::{sink, stream};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::socket::{Connector, Socket, SocketEvent};

// ============================================================================
// MockPeer
// ============================================================================

/// Gateway side of a mock connection.
pub(crate) struct MockPeer {
    /// Frames sent by the client.
    pub outbound: mpsc::UnboundedReceiver<String>,
    /// Events delivered to the client.
    pub inbound: mpsc::UnboundedSender<SocketEvent>,
}

impl MockPeer {
    /// Waits for the next frame sent by the client, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.outbound.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Delivers a JSON frame to the client.
    pub fn push_json(&self, value: &Value) {
        let _ = self.inbound.send(SocketEvent::Text(value.to_string()));
    }

    /// Delivers a raw text frame to the client.
    pub fn push_text(&self, text: &str) {
        let _ = self.inbound.send(SocketEvent::Text(text.to_string()));
    }

    /// Reports a socket error to the client.
    pub fn push_error(&self, message: &str) {
        let _ = self.inbound.send(SocketEvent::Error(message.to_string()));
    }

    /// Closes the connection from the gateway side.
    pub fn close(&self) {
        let _ = self.inbound.send(SocketEvent::Closed(Some("peer closed".into())));
    }
}

// ============================================================================
// MockConnector
// ============================================================================

/// Connector that either refuses or hands out in-memory sockets.
pub(crate) struct MockConnector {
    refusing: AtomicBool,
    attempts: AtomicUsize,
    peers_tx: mpsc::UnboundedSender<MockPeer>,
    peers_rx: Mutex<Option<mpsc::UnboundedReceiver<MockPeer>>>,
}

impl MockConnector {
    /// Creates a connector that accepts every attempt.
    pub fn accepting() -> Arc<Self> {
        Self::with_refusing(false)
    }

    /// Creates a connector that refuses every attempt.
    pub fn refusing() -> Arc<Self> {
        Self::with_refusing(true)
    }

    fn with_refusing(refusing: bool) -> Arc<Self> {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            refusing: AtomicBool::new(refusing),
            attempts: AtomicUsize::new(0),
            peers_tx,
            peers_rx: Mutex::new(Some(peers_rx)),
        })
    }

    /// Switches between refusing and accepting.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Returns the number of connect attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Takes the receiver of accepted peers. Only the first call succeeds.
    pub fn peers(&self) -> mpsc::UnboundedReceiver<MockPeer> {
        self.peers_rx
            .lock()
            .take()
            .expect("peers receiver already taken")
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<Socket> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.refusing.load(Ordering::SeqCst) {
            return Err(Error::connection("connection refused"));
        }

        let (client_tx, peer_rx) = mpsc::unbounded_channel::<String>();
        let (peer_tx, client_rx) = mpsc::unbounded_channel::<SocketEvent>();

        let sink = sink::unfold(client_tx, |tx, text: String| async move {
            tx.send(text).map_err(|_| Error::ConnectionClosed)?;
            Ok::<_, Error>(tx)
        });
        let stream = stream::unfold(client_rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        let _ = self.peers_tx.send(MockPeer {
            outbound: peer_rx,
            inbound: peer_tx,
        });

        Ok(Socket::new(Box::pin(sink), Box::pin(stream)))
    }
}
