//! Message-based bidirectional transports.
//!
//! A transport carries named events with JSON payloads in both directions.
//! The session only relies on three capabilities: emitting an event, reading
//! the inbound event stream, and closing the connection.
//!
//! Two implementations are provided:
//!
//! - [`WsConnector`]: WebSocket transport with automatic reconnection
//! - [`MemoryConnector`]: in-process transport, the server side is driven
//!   through [`MemoryPeer`]

pub mod config;
pub mod frame;
pub mod memory;
pub mod ws;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

pub use config::WsConfig;
pub use frame::Frame;
pub use memory::{MemoryConnector, MemoryPeer, MemoryServer};
pub use ws::{WsConnector, WsTransport};

use crate::discovery::Endpoint;
use crate::error::SessionError;

/// Events reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Dialing the endpoint.
    Connecting,
    /// Connection established (also sent after every reconnection).
    Connected,
    /// Connection lost.
    Disconnected {
        /// Why the connection was lost.
        reason: String,
    },
    /// A connection attempt failed.
    ConnectFailed {
        /// Why the attempt failed.
        reason: String,
    },
    /// About to retry the connection.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// A reconnection attempt succeeded.
    Reconnected,
    /// Reconnection was abandoned.
    ReconnectFailed {
        /// Why reconnection was abandoned.
        reason: String,
    },
    /// The transport is closed for good; no further events follow.
    Closed,
    /// A named event from the server.
    Message {
        /// Event name.
        event: String,
        /// Event payload.
        payload: Value,
    },
}

/// An open connection.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Returns the id of the current physical connection, if any.
    fn connection_id(&self) -> Option<String>;

    /// Sends a named event.
    async fn emit(&self, event: &str, payload: Value) -> Result<(), SessionError>;

    /// Closes the connection. Idempotent.
    async fn close(&self);
}

/// A freshly opened transport together with its inbound event stream.
#[derive(Debug)]
pub struct Connection {
    /// The transport handle.
    pub transport: Arc<dyn Transport>,
    /// Inbound events, in arrival order.
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens transports to discovered endpoints.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Opens a transport to the endpoint.
    async fn open(&self, endpoint: &Endpoint) -> Result<Connection, SessionError>;
}
