//! WebSocket transport implementation.
//!
//! Frames are JSON text messages (see [`Frame`]). After an unrequested
//! disconnect the transport redials with exponential backoff and reports
//! every step through [`TransportEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::config::WsConfig;
use super::frame::Frame;
use super::{Connection, Connector, Transport, TransportEvent};
use crate::discovery::Endpoint;
use crate::error::SessionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Opens WebSocket transports.
#[derive(Debug, Clone)]
pub struct WsConnector {
    config: WsConfig,
}

impl WsConnector {
    /// Creates a new connector with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: WsConfig) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Creates a new connector with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            config: WsConfig::default(),
        }
    }

    /// Returns the connector configuration.
    #[must_use]
    pub fn config(&self) -> &WsConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Connection, SessionError> {
        let url = endpoint.socket_url(&self.config.path);
        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer);

        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await?;
        let (sink, source) = ws_stream.split();

        let transport = Arc::new(WsTransport {
            url,
            connection_id: std::sync::Mutex::new(Some(new_connection_id())),
            sink: Arc::new(Mutex::new(Some(sink))),
            closing: Arc::new(AtomicBool::new(false)),
        });

        tokio::spawn(read_loop(
            Arc::clone(&transport),
            source,
            event_tx,
            self.config.clone(),
        ));

        Ok(Connection {
            transport,
            events: event_rx,
        })
    }
}

/// An open WebSocket transport.
#[derive(Debug)]
pub struct WsTransport {
    url: String,
    connection_id: std::sync::Mutex<Option<String>>,
    sink: Arc<Mutex<Option<WsSink>>>,
    closing: Arc<AtomicBool>,
}

impl WsTransport {
    /// Returns the socket URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns true once `close` was requested.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn set_connection_id(&self, id: Option<String>) {
        if let Ok(mut guard) = self.connection_id.lock() {
            *guard = id;
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn connection_id(&self) -> Option<String> {
        self.connection_id.lock().ok().and_then(|id| id.clone())
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), SessionError> {
        let json = serde_json::to_string(&Frame::new(event, payload))?;

        let mut sink_guard = self.sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(SessionError::NotConnected)?;

        sink.send(Message::Text(json.into()))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(ref mut sink) = *self.sink.lock().await {
            let _ = sink.send(Message::Close(None)).await;
        }

        *self.sink.lock().await = None;
        self.set_connection_id(None);
    }
}

fn new_connection_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Why the reader stopped pumping one physical connection.
enum Ended {
    /// The connection dropped, with a reason.
    Lost(String),
    /// Nobody listens to the events anymore.
    Abandoned,
}

async fn read_loop(
    transport: Arc<WsTransport>,
    mut source: WsSource,
    events: mpsc::Sender<TransportEvent>,
    config: WsConfig,
) {
    // sent from here so `open` never waits on a small event buffer
    for event in [TransportEvent::Connecting, TransportEvent::Connected] {
        if events.send(event).await.is_err() {
            transport.close().await;
            return;
        }
    }

    loop {
        let reason = match pump(&mut source, &events).await {
            Ended::Lost(reason) => reason,
            Ended::Abandoned => {
                transport.close().await;
                return;
            }
        };

        transport.set_connection_id(None);
        *transport.sink.lock().await = None;

        if transport.is_closing() {
            let _ = events.send(TransportEvent::Closed).await;
            return;
        }

        let _ = events
            .send(TransportEvent::Disconnected { reason })
            .await;

        match reconnect(&transport, &events, &config).await {
            Some(next) => source = next,
            None => {
                let _ = events.send(TransportEvent::Closed).await;
                return;
            }
        }
    }
}

async fn pump(source: &mut WsSource, events: &mpsc::Sender<TransportEvent>) -> Ended {
    while let Some(result) = source.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(&text) {
                Ok(frame) => {
                    let event = TransportEvent::Message {
                        event: frame.event,
                        payload: frame.data,
                    };
                    if events.send(event).await.is_err() {
                        return Ended::Abandoned;
                    }
                }
                Err(e) => debug!(error = %e, "ignoring malformed frame"),
            },
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by server".to_string());
                return Ended::Lost(reason);
            }
            Err(e) => return Ended::Lost(e.to_string()),
            _ => {}
        }
    }

    Ended::Lost("stream ended".to_string())
}

async fn reconnect(
    transport: &WsTransport,
    events: &mpsc::Sender<TransportEvent>,
    config: &WsConfig,
) -> Option<WsSource> {
    if !config.reconnect {
        return None;
    }

    let mut delay = config.reconnect_delay;
    let mut attempt = 0u32;

    loop {
        if let Some(max) = config.max_reconnect_attempts {
            if attempt >= max {
                let _ = events
                    .send(TransportEvent::ReconnectFailed {
                        reason: format!("gave up after {} attempts", attempt),
                    })
                    .await;
                return None;
            }
        }

        attempt += 1;
        if events
            .send(TransportEvent::Reconnecting { attempt })
            .await
            .is_err()
        {
            return None;
        }

        tokio::time::sleep(delay).await;
        if transport.is_closing() {
            return None;
        }

        match tokio_tungstenite::connect_async(transport.url()).await {
            Ok((ws_stream, _)) => {
                let (sink, source) = ws_stream.split();
                *transport.sink.lock().await = Some(sink);
                transport.set_connection_id(Some(new_connection_id()));

                let _ = events.send(TransportEvent::Reconnected).await;
                let _ = events.send(TransportEvent::Connected).await;
                return Some(source);
            }
            Err(e) => {
                let _ = events
                    .send(TransportEvent::ConnectFailed {
                        reason: e.to_string(),
                    })
                    .await;
                delay = config.next_delay(delay);
            }
        }
    }
}
