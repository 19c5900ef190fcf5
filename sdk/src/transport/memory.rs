//! In-process transport.
//!
//! Every [`MemoryConnector::open`] hands the server side of the new
//! connection to the paired [`MemoryServer`] as a [`MemoryPeer`], which can
//! push events to the client and read what the client emitted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::frame::Frame;
use super::{Connection, Connector, Transport, TransportEvent};
use crate::discovery::Endpoint;
use crate::error::SessionError;

/// Capacity of the client-side event channel of a memory connection.
const EVENT_BUFFER: usize = 256;

/// Opens in-process transports.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    opened: Arc<AtomicUsize>,
}

/// Accepts the server side of memory connections.
#[derive(Debug)]
pub struct MemoryServer {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryConnector {
    /// Creates a connector and the server accepting its connections.
    #[must_use]
    pub fn new() -> (Self, MemoryServer) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers: peers_tx,
            opened: Arc::new(AtomicUsize::new(0)),
        };
        (connector, MemoryServer { peers: peers_rx })
    }

    /// Returns how many transports were opened.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl MemoryServer {
    /// Waits for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Returns the next connection if one is already waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Connection, SessionError> {
        let number = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let transport = Arc::new(MemoryTransport {
            connection_id: format!("memory-{}", number),
            frames: frame_tx,
            events: event_tx.clone(),
            closed: Arc::clone(&closed),
        });

        let _ = event_tx.send(TransportEvent::Connecting).await;
        let _ = event_tx.send(TransportEvent::Connected).await;

        let peer = MemoryPeer {
            endpoint: endpoint.clone(),
            frames: frame_rx,
            events: event_tx,
            closed,
        };
        self.peers
            .send(peer)
            .map_err(|_| SessionError::Transport("memory server dropped".to_string()))?;

        Ok(Connection {
            transport,
            events: event_rx,
        })
    }
}

#[derive(Debug)]
struct MemoryTransport {
    connection_id: String,
    frames: mpsc::UnboundedSender<Frame>,
    events: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn connection_id(&self) -> Option<String> {
        if self.closed.load(Ordering::SeqCst) {
            None
        } else {
            Some(self.connection_id.clone())
        }
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::NotConnected);
        }
        self.frames
            .send(Frame::new(event, payload))
            .map_err(|_| SessionError::NotConnected)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.try_send(TransportEvent::Closed);
        }
    }
}

/// Server side of a memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    endpoint: Endpoint,
    frames: mpsc::UnboundedReceiver<Frame>,
    events: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Returns the endpoint the client dialed.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Pushes a named event to the client.
    ///
    /// Returns true if the client is still listening.
    pub async fn send(&self, event: impl Into<String>, payload: Value) -> bool {
        self.lifecycle(TransportEvent::Message {
            event: event.into(),
            payload,
        })
        .await
    }

    /// Pushes a raw transport event to the client.
    ///
    /// Returns true if the client is still listening.
    pub async fn lifecycle(&self, event: TransportEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Drops the connection from the server side.
    pub async fn hang_up(&self, reason: impl Into<String>) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self
            .events
            .send(TransportEvent::Disconnected {
                reason: reason.into(),
            })
            .await;
        let _ = self.events.send(TransportEvent::Closed).await;
    }

    /// Waits for the next frame the client emitted.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Returns the next emitted frame if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }

    /// Returns true once the client closed the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_open_hands_peer_to_server() {
        let (connector, mut server) = MemoryConnector::new();
        let endpoint = Endpoint::new("127.0.0.1", 9100);
        let mut connection = connector.open(&endpoint).await.expect("open");

        let peer = server.accept().await.expect("peer");
        assert_eq!(peer.endpoint(), &endpoint);
        assert_eq!(connector.opened(), 1);

        assert_eq!(connection.events.recv().await, Some(TransportEvent::Connecting));
        assert_eq!(connection.events.recv().await, Some(TransportEvent::Connected));
        assert_eq!(
            connection.transport.connection_id().as_deref(),
            Some("memory-1")
        );
    }

    #[tokio::test]
    async fn test_emit_and_send() {
        let (connector, mut server) = MemoryConnector::new();
        let mut connection = connector
            .open(&Endpoint::new("127.0.0.1", 9100))
            .await
            .expect("open");
        let mut peer = server.accept().await.expect("peer");

        connection
            .transport
            .emit("echo", json!({"x": 1}))
            .await
            .expect("emit");
        assert_eq!(peer.recv().await, Some(Frame::new("echo", json!({"x": 1}))));

        assert!(peer.send("identity", json!("sess-1")).await);
        let _ = connection.events.recv().await;
        let _ = connection.events.recv().await;
        assert_eq!(
            connection.events.recv().await,
            Some(TransportEvent::Message {
                event: "identity".to_string(),
                payload: json!("sess-1"),
            })
        );
    }

    #[tokio::test]
    async fn test_close() {
        let (connector, mut server) = MemoryConnector::new();
        let connection = connector
            .open(&Endpoint::new("127.0.0.1", 9100))
            .await
            .expect("open");
        let peer = server.accept().await.expect("peer");

        connection.transport.close().await;
        connection.transport.close().await;

        assert!(peer.is_closed());
        assert!(connection.transport.connection_id().is_none());
        assert!(matches!(
            connection.transport.emit("late", Value::Null).await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_open_without_server() {
        let (connector, server) = MemoryConnector::new();
        drop(server);
        let result = connector.open(&Endpoint::new("127.0.0.1", 9100)).await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
    }
}
