//! Live sessions.
//!
//! A [`Session`] owns one transport, the identity the server assigned to it,
//! and the table of correlated requests still waiting for their response.
//! Sessions are created by the [`Bootstrapper`](crate::Bootstrapper) only
//! after the identity handshake, so a handle is never half initialised.
//!
//! # Example
//!
//! ```rust,ignore
//! let session = manager.instance(AcquireOptions::default()).await?.ok_or("exhausted")?;
//! let reply = session.post("echo", json!({"x": 1})).await?;
//! ```

pub mod adapter;
pub mod correlation;
pub mod event;
pub mod notice;
pub mod state;

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub use correlation::CorrelationTable;
pub use event::ServerEvent;
pub use notice::{Notice, Notices};
pub use state::SessionState;

use crate::config::SessionConfig;
use crate::discovery::{Discovery, Endpoint};
use crate::error::SessionError;
use crate::transport::{Connection, Transport, TransportEvent};

type ReadySender = oneshot::Sender<Result<(), SessionError>>;

/// A server event the session does not consume itself.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Event name.
    pub event: String,
    /// Event payload.
    pub payload: Value,
}

/// Collaborators a session is built with.
#[derive(Debug, Clone)]
pub(crate) struct SessionParts {
    pub(crate) config: SessionConfig,
    pub(crate) discovery: Arc<dyn Discovery>,
    pub(crate) notices: Notices,
}

#[derive(Debug)]
struct SessionInner {
    config: SessionConfig,
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    discovery: Arc<dyn Discovery>,
    notices: Notices,
    inbound: broadcast::Sender<InboundMessage>,
    identity: RwLock<Option<String>>,
    state: RwLock<SessionState>,
    table: CorrelationTable,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a live session. Clones share the same session.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// Non-owning reference to a session.
#[derive(Debug, Clone)]
pub struct WeakSession {
    inner: Weak<SessionInner>,
}

impl WeakSession {
    /// Returns the session if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Session> {
        self.inner.upgrade().map(|inner| Session { inner })
    }
}

impl Session {
    /// Runs the identity handshake over a freshly opened connection.
    ///
    /// Resolves once the server assigned an identity. Without a configured
    /// `handshake_timeout` this waits for as long as the transport stays open.
    pub(crate) async fn establish(
        endpoint: Endpoint,
        connection: Connection,
        parts: SessionParts,
    ) -> Result<Self, SessionError> {
        let Connection { transport, events } = connection;
        let (inbound, _) = broadcast::channel(parts.config.inbound_capacity.max(1));
        let handshake_timeout = parts.config.handshake_timeout;

        let inner = Arc::new(SessionInner {
            config: parts.config,
            endpoint,
            transport,
            discovery: parts.discovery,
            notices: parts.notices,
            inbound,
            identity: RwLock::new(None),
            state: RwLock::new(SessionState::Connecting),
            table: CorrelationTable::new(),
            heartbeat: Mutex::new(None),
            dispatcher: Mutex::new(None),
        });

        let (ready_tx, ready_rx) = oneshot::channel();
        let dispatcher = tokio::spawn(run_dispatcher(Arc::downgrade(&inner), events, ready_tx));
        *inner.dispatcher.lock().await = Some(dispatcher);

        let outcome = match handshake_timeout {
            Some(limit) => match tokio::time::timeout(limit, ready_rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(endpoint = %inner.endpoint, "no identity assigned within {:?}", limit);
                    inner
                        .teardown(SessionState::Closed, SessionError::HandshakeTimeout)
                        .await;
                    return Err(SessionError::HandshakeTimeout);
                }
            },
            None => ready_rx.await,
        };

        match outcome {
            Ok(Ok(())) => Ok(Self { inner }),
            Ok(Err(e)) => {
                inner.teardown(SessionState::Closed, e.clone()).await;
                Err(e)
            }
            Err(_) => {
                inner
                    .teardown(SessionState::Closed, SessionError::SessionClosed)
                    .await;
                Err(SessionError::SessionClosed)
            }
        }
    }

    /// Returns true if both handles refer to the same session.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Returns a non-owning reference to this session.
    #[must_use]
    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns the server-assigned identity, absent once torn down.
    pub async fn identity(&self) -> Option<String> {
        self.inner.identity.read().await.clone()
    }

    /// Returns the lifecycle state.
    pub async fn state(&self) -> SessionState {
        *self.inner.state.read().await
    }

    /// Returns true while requests can be sent.
    pub async fn is_active(&self) -> bool {
        self.state().await == SessionState::Active
    }

    /// Returns the endpoint this session is connected to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Returns the session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns the id of the current physical connection.
    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.inner.transport.connection_id()
    }

    /// Returns the number of requests waiting for a response.
    pub async fn pending_requests(&self) -> usize {
        self.inner.table.len().await
    }

    /// Subscribes to server events the session does not consume itself.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inner.inbound.subscribe()
    }

    /// Subscribes to user-facing notices.
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    /// Emits an event stamped with the session identity.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotActive`] unless the session is active, or
    /// the transport error.
    pub async fn emit(&self, event: &str, payload: Value) -> Result<(), SessionError> {
        self.inner.emit(event, payload).await
    }

    /// Sends a correlated request and waits for its response.
    ///
    /// The request id is inserted under the reserved request-id key; a
    /// caller field with the same name is overwritten. Resolves with the full
    /// response payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not active, the emit fails, or the
    /// session is torn down before the response arrives.
    pub async fn post(&self, event: &str, payload: Value) -> Result<Value, SessionError> {
        let (_, rx) = self.request(event, payload).await?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Like [`post`](Self::post), but gives up after `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] when no response arrived in time,
    /// or any error [`post`](Self::post) returns.
    pub async fn post_timeout(
        &self,
        event: &str,
        payload: Value,
        limit: Duration,
    ) -> Result<Value, SessionError> {
        let (id, rx) = self.request(event, payload).await?;
        match tokio::time::timeout(limit, rx).await {
            Ok(resolution) => resolution.map_err(|_| SessionError::SessionClosed)?,
            Err(_) => {
                self.inner.table.discard(&id).await;
                Err(SessionError::Timeout)
            }
        }
    }

    async fn request(
        &self,
        event: &str,
        payload: Value,
    ) -> Result<(String, oneshot::Receiver<Result<Value, SessionError>>), SessionError> {
        if !self.is_active().await {
            return Err(SessionError::NotActive);
        }

        let (id, rx) = self.inner.table.register().await;
        let payload = adapter::with_request_id(payload, &id, &self.inner.config.protocol);

        if let Err(e) = self.inner.emit(event, payload).await {
            self.inner.table.discard(&id).await;
            return Err(e);
        }

        Ok((id, rx))
    }

    /// Tears the session down on purpose.
    ///
    /// Tells the backend the identity is leaving (fire and forget), closes
    /// the transport, clears the identity and fails every pending request
    /// with [`SessionError::SessionClosed`].
    pub async fn destroy(&self) {
        if let Some(identity) = self.identity().await {
            let discovery = Arc::clone(&self.inner.discovery);
            let endpoint = self.inner.endpoint.clone();
            tokio::spawn(async move {
                if let Err(e) = discovery.notify_disconnect(&endpoint, &identity).await {
                    debug!(error = %e, "disconnect notice not delivered");
                }
            });
        }

        self.inner
            .teardown(SessionState::Closed, SessionError::SessionClosed)
            .await;
    }
}

impl SessionInner {
    async fn emit(&self, event: &str, payload: Value) -> Result<(), SessionError> {
        if *self.state.read().await != SessionState::Active {
            return Err(SessionError::NotActive);
        }
        let identity = self
            .identity
            .read()
            .await
            .clone()
            .ok_or(SessionError::NotActive)?;

        let connection_id = self.transport.connection_id();
        let stamped = adapter::stamp(
            payload,
            &identity,
            connection_id.as_deref(),
            &self.config.protocol,
        );
        self.transport.emit(event, stamped).await
    }

    async fn handle(self: &Arc<Self>, event: TransportEvent, ready: &mut Option<ReadySender>) {
        match event {
            TransportEvent::Connecting => {
                info!(endpoint = %self.endpoint, "connecting");
            }
            TransportEvent::Connected => {
                info!(
                    endpoint = %self.endpoint,
                    connection_id = ?self.transport.connection_id(),
                    "connected"
                );
                let mut state = self.state.write().await;
                if *state == SessionState::Connecting {
                    *state = SessionState::AwaitingIdentity;
                }
            }
            TransportEvent::Disconnected { reason } => {
                warn!(endpoint = %self.endpoint, reason = %reason, "disconnected");
            }
            TransportEvent::ConnectFailed { reason } => {
                warn!(endpoint = %self.endpoint, reason = %reason, "connect failed");
            }
            TransportEvent::Reconnecting { attempt } => {
                info!(endpoint = %self.endpoint, attempt, "reconnecting");
            }
            TransportEvent::Reconnected => {
                info!(endpoint = %self.endpoint, "reconnected");
            }
            TransportEvent::ReconnectFailed { reason } => {
                error!(endpoint = %self.endpoint, reason = %reason, "reconnect failed");
            }
            TransportEvent::Closed => {
                self.teardown(SessionState::Closed, SessionError::SessionClosed)
                    .await;
                fail_ready(ready, SessionError::SessionClosed);
            }
            TransportEvent::Message { event, payload } => {
                let event = ServerEvent::classify(&self.config.protocol, event, payload);
                self.dispatch(event, ready).await;
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, event: ServerEvent, ready: &mut Option<ReadySender>) {
        match event {
            ServerEvent::IdentityAssigned(identity) => {
                self.adopt_identity(identity, ready).await;
            }
            ServerEvent::InvalidIdentity(payload) => {
                warn!(payload = %payload, "ignoring identity event without a usable value");
            }
            ServerEvent::Reset => {
                warn!(endpoint = %self.endpoint, "server reset the session identity");
                self.teardown(SessionState::Reset, SessionError::Reset).await;
                fail_ready(ready, SessionError::Reset);
            }
            ServerEvent::ApplicationError(message) => {
                error!(endpoint = %self.endpoint, error = %message, "application error from server");
                self.notices.publish(Notice::ApplicationError { message });
            }
            ServerEvent::Response { id, payload } => {
                if !self.table.resolve(&id, payload).await {
                    debug!(request_id = %id, "dropping response without a pending request");
                }
            }
            ServerEvent::UnmatchedResponse(payload) => {
                debug!(payload = %payload, "dropping response without a request id");
            }
            ServerEvent::Other { event, payload } => {
                // no subscribers is fine
                let _ = self.inbound.send(InboundMessage { event, payload });
            }
        }
    }

    async fn adopt_identity(self: &Arc<Self>, identity: String, ready: &mut Option<ReadySender>) {
        {
            let mut current = self.identity.write().await;
            match current.as_deref() {
                None => {
                    info!(endpoint = %self.endpoint, identity = %identity, "identity assigned");
                    *current = Some(identity);
                }
                Some(existing) => {
                    debug!(identity = %existing, ignored = %identity, "keeping first assigned identity");
                }
            }
        }

        let mut state = self.state.write().await;
        if matches!(
            *state,
            SessionState::Connecting | SessionState::AwaitingIdentity
        ) {
            *state = SessionState::Active;
            drop(state);

            self.start_heartbeat().await;
            if let Some(tx) = ready.take() {
                let _ = tx.send(Ok(()));
            }
        }
    }

    async fn start_heartbeat(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.config.heartbeat_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if *inner.state.read().await != SessionState::Active {
                    break;
                }
                let event = inner.config.protocol.heartbeat_event.clone();
                if let Err(e) = inner.emit(&event, Value::Null).await {
                    debug!(error = %e, "heartbeat not sent");
                }
            }
        });

        if let Some(previous) = self.heartbeat.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Moves to a terminal state. Returns false if already terminal.
    async fn teardown(&self, next: SessionState, error: SessionError) -> bool {
        {
            let mut state = self.state.write().await;
            if state.is_terminal() {
                return false;
            }
            *state = next;
        }

        let identity = self.identity.write().await.take();
        if let Some(heartbeat) = self.heartbeat.lock().await.take() {
            heartbeat.abort();
        }
        let failed = self.table.fail_all(error).await;
        self.transport.close().await;

        info!(
            endpoint = %self.endpoint,
            state = %next,
            identity = ?identity,
            failed_requests = failed,
            "disconnect"
        );
        true
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.get_mut().take() {
            heartbeat.abort();
        }
        if let Some(dispatcher) = self.dispatcher.get_mut().take() {
            dispatcher.abort();
        }
        if !self.state.get_mut().is_terminal() {
            let transport = Arc::clone(&self.transport);
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { transport.close().await });
            }
        }
    }
}

fn fail_ready(ready: &mut Option<ReadySender>, error: SessionError) {
    if let Some(tx) = ready.take() {
        let _ = tx.send(Err(error));
    }
}

async fn run_dispatcher(
    weak: Weak<SessionInner>,
    mut events: mpsc::Receiver<TransportEvent>,
    ready: ReadySender,
) {
    let mut ready = Some(ready);

    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        inner.handle(event, &mut ready).await;
        if inner.state.read().await.is_terminal() {
            return;
        }
    }

    // the transport went away without saying goodbye
    if let Some(inner) = weak.upgrade() {
        inner
            .teardown(SessionState::Closed, SessionError::SessionClosed)
            .await;
    }
    fail_ready(&mut ready, SessionError::SessionClosed);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{active_session, eventually, next_frame, Harness};
    use crate::transport::Frame;

    #[tokio::test]
    async fn test_handshake_activates_session() {
        let (session, _peer, _harness) = active_session(SessionConfig::default()).await;
        assert_eq!(session.state().await, SessionState::Active);
        assert_eq!(session.identity().await.as_deref(), Some("sess-42"));
        assert_eq!(session.endpoint(), &Endpoint::new("127.0.0.1", 9100));
    }

    #[tokio::test]
    async fn test_post_wire_shape_and_resolution() {
        let (session, mut peer, _harness) = active_session(SessionConfig::default()).await;

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.post("echo", json!({"x": 1})).await })
        };

        let frame = next_frame(&mut peer).await;
        assert_eq!(frame.event, "echo");
        assert_eq!(frame.data["x"], json!(1));
        assert_eq!(frame.data["client_id"], json!("sess-42"));
        let request_id = frame.data["__request_id"]
            .as_str()
            .expect("request id")
            .to_string();

        assert!(peer.send("response", json!({"id": request_id, "ok": true})).await);

        let reply = task.await.expect("join").expect("reply");
        assert_eq!(reply, json!({"id": request_id, "ok": true}));
        assert_eq!(session.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn test_responses_out_of_order() {
        let (session, mut peer, _harness) = active_session(SessionConfig::default()).await;

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.post("work", json!({"n": 1})).await })
        };
        let first_id = next_frame(&mut peer).await.data["__request_id"].clone();

        let second = {
            let session = session.clone();
            tokio::spawn(async move { session.post("work", json!({"n": 2})).await })
        };
        let second_id = next_frame(&mut peer).await.data["__request_id"].clone();

        peer.send("response", json!({"__request_id": second_id, "n": 2})).await;
        peer.send("response", json!({"__request_id": first_id, "n": 1})).await;

        assert_eq!(first.await.expect("join").expect("reply")["n"], json!(1));
        assert_eq!(second.await.expect("join").expect("reply")["n"], json!(2));
    }

    #[tokio::test]
    async fn test_duplicate_response_is_dropped() {
        let (session, mut peer, _harness) = active_session(SessionConfig::default()).await;

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.post("echo", Value::Null).await })
        };
        let id = next_frame(&mut peer).await.data["__request_id"].clone();

        peer.send("response", json!({"id": id, "n": 1})).await;
        peer.send("response", json!({"id": id, "n": 2})).await;
        peer.send("response", json!({"id": "unknown"})).await;

        assert_eq!(task.await.expect("join").expect("reply")["n"], json!(1));

        // the session keeps working after the orphans
        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.post("echo", Value::Null).await })
        };
        let id = next_frame(&mut peer).await.data["__request_id"].clone();
        peer.send("response", json!({"id": id, "n": 3})).await;
        assert_eq!(task.await.expect("join").expect("reply")["n"], json!(3));
    }

    #[tokio::test]
    async fn test_every_emit_is_stamped() {
        let (session, mut peer, _harness) = active_session(SessionConfig::default()).await;

        session
            .emit("note", json!({"client_id": "forged"}))
            .await
            .expect("emit");
        session.emit("note", json!("plain")).await.expect("emit");

        let frame = next_frame(&mut peer).await;
        assert_eq!(frame.data, json!({"client_id": "sess-42"}));

        let frame = next_frame(&mut peer).await;
        assert_eq!(
            frame.data,
            json!({"message": "plain", "client_id": "sess-42", "connection_id": "memory-1"})
        );
    }

    #[tokio::test]
    async fn test_identity_is_sticky() {
        let (session, peer, _harness) = active_session(SessionConfig::default()).await;

        peer.lifecycle(TransportEvent::Disconnected {
            reason: "network".to_string(),
        })
        .await;
        peer.lifecycle(TransportEvent::Reconnected).await;
        peer.lifecycle(TransportEvent::Connected).await;
        peer.send("identity", json!("sess-43")).await;

        // a marker event proves the identity event was processed
        let mut inbound = session.subscribe();
        peer.send("marker", Value::Null).await;
        let marker = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .expect("in time")
            .expect("marker");
        assert_eq!(marker.event, "marker");

        assert_eq!(session.identity().await.as_deref(), Some("sess-42"));
        assert!(session.is_active().await);
    }

    #[tokio::test]
    async fn test_reset_tears_down() {
        let (session, mut peer, _harness) = active_session(SessionConfig::default()).await;

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.post("slow", Value::Null).await })
        };
        let _ = next_frame(&mut peer).await;

        peer.send("reset", Value::Null).await;

        assert_eq!(
            pending.await.expect("join"),
            Err(SessionError::Reset)
        );
        assert_eq!(session.state().await, SessionState::Reset);
        assert!(session.identity().await.is_none());
        assert!(peer.is_closed());
        assert_eq!(
            session.emit("late", Value::Null).await,
            Err(SessionError::NotActive)
        );
    }

    #[tokio::test]
    async fn test_transport_close_fails_pending() {
        let (session, mut peer, _harness) = active_session(SessionConfig::default()).await;

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.post("slow", Value::Null).await })
        };
        let _ = next_frame(&mut peer).await;

        peer.hang_up("server restart").await;

        assert_eq!(
            pending.await.expect("join"),
            Err(SessionError::SessionClosed)
        );
        assert_eq!(session.state().await, SessionState::Closed);
        assert!(session.identity().await.is_none());
    }

    #[tokio::test]
    async fn test_destroy_notifies_and_closes() {
        let (session, peer, harness) = active_session(SessionConfig::default()).await;

        session.destroy().await;

        assert_eq!(session.state().await, SessionState::Closed);
        assert!(session.identity().await.is_none());
        assert!(peer.is_closed());
        assert_eq!(
            session.post("late", Value::Null).await,
            Err(SessionError::NotActive)
        );

        let discovery = Arc::clone(&harness.discovery);
        eventually(|| !discovery.notices().is_empty()).await;
        assert_eq!(
            harness.discovery.notices(),
            vec![(Endpoint::new("127.0.0.1", 9100), "sess-42".to_string())]
        );

        // a second destroy sends nothing
        session.destroy().await;
        tokio::task::yield_now().await;
        assert_eq!(harness.discovery.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_application_error_becomes_notice() {
        let (session, peer, _harness) = active_session(SessionConfig::default()).await;
        let mut notices = session.notices();

        peer.send("app_error", json!({"error": "quota exceeded"})).await;

        let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv())
            .await
            .expect("in time")
            .expect("notice");
        assert_eq!(
            notice,
            Notice::ApplicationError {
                message: "quota exceeded".to_string()
            }
        );
        assert!(session.is_active().await);
    }

    #[tokio::test]
    async fn test_business_events_reach_subscribers() {
        let (session, peer, _harness) = active_session(SessionConfig::default()).await;
        let mut inbound = session.subscribe();

        peer.send("chat", json!({"text": "hi"})).await;

        let message = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .expect("in time")
            .expect("message");
        assert_eq!(
            message,
            InboundMessage {
                event: "chat".to_string(),
                payload: json!({"text": "hi"}),
            }
        );
    }

    #[tokio::test]
    async fn test_heartbeat_is_stamped() {
        let config = SessionConfig::new().with_heartbeat_interval(Duration::from_millis(20));
        let (_session, mut peer, _harness) = active_session(config).await;

        let frame = next_frame(&mut peer).await;
        assert_eq!(
            frame,
            Frame::new(
                "heartbeat",
                json!({"message": null, "client_id": "sess-42", "connection_id": "memory-1"})
            )
        );
        let frame = next_frame(&mut peer).await;
        assert_eq!(frame.event, "heartbeat");
    }

    #[tokio::test]
    async fn test_heartbeat_stops_after_teardown() {
        let config = SessionConfig::new().with_heartbeat_interval(Duration::from_millis(10));
        let (session, mut peer, _harness) = active_session(config).await;

        session.destroy().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        while peer.try_recv().is_some() {}
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_post_timeout() {
        let (session, mut peer, _harness) = active_session(SessionConfig::default()).await;

        let result = session
            .post_timeout("slow", Value::Null, Duration::from_millis(20))
            .await;
        assert_eq!(result, Err(SessionError::Timeout));
        assert_eq!(session.pending_requests().await, 0);

        let id = next_frame(&mut peer).await.data["__request_id"].clone();
        // a late response is an orphan and changes nothing
        peer.send("response", json!({"id": id})).await;
        assert!(session.is_active().await);
    }

    #[tokio::test]
    async fn test_handshake_fails_when_transport_closes() {
        let mut harness = Harness::new(SessionConfig::default());
        let bootstrapper = harness.bootstrapper.clone();
        let task = tokio::spawn(async move { bootstrapper.acquire(&[], &Default::default()).await });

        let peer = harness.server.accept().await.expect("peer");
        peer.hang_up("refused").await;

        assert!(matches!(
            task.await.expect("join"),
            Err(SessionError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_handshake_fails_on_reset() {
        let mut harness = Harness::new(SessionConfig::default());
        let bootstrapper = harness.bootstrapper.clone();
        let task = tokio::spawn(async move { bootstrapper.acquire(&[], &Default::default()).await });

        let peer = harness.server.accept().await.expect("peer");
        peer.send("reset", Value::Null).await;

        assert!(matches!(task.await.expect("join"), Err(SessionError::Reset)));
    }

    #[tokio::test]
    async fn test_handshake_timeout_is_opt_in() {
        let config = SessionConfig::new().with_handshake_timeout(Duration::from_millis(20));
        let mut harness = Harness::new(config);

        let result = harness.bootstrapper.acquire(&[], &Default::default()).await;
        assert!(matches!(result, Err(SessionError::HandshakeTimeout)));

        let peer = harness.server.accept().await.expect("peer");
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_invalid_identity_is_ignored() {
        let mut harness = Harness::new(SessionConfig::default());
        let bootstrapper = harness.bootstrapper.clone();
        let task = tokio::spawn(async move { bootstrapper.acquire(&[], &Default::default()).await });

        let peer = harness.server.accept().await.expect("peer");
        peer.send("identity", Value::Null).await;
        peer.send("identity", json!("sess-7")).await;

        let session = task.await.expect("join").expect("acquire").expect("session");
        assert_eq!(session.identity().await.as_deref(), Some("sess-7"));
    }

    #[tokio::test]
    async fn test_weak_session() {
        let (session, _peer, _harness) = active_session(SessionConfig::default()).await;
        let weak = session.downgrade();

        let upgraded = weak.upgrade().expect("alive");
        assert!(Session::ptr_eq(&session, &upgraded));

        drop(upgraded);
        drop(session);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_dropping_last_handle_closes_transport() {
        let (session, peer, _harness) = active_session(SessionConfig::default()).await;
        drop(session);
        eventually(|| peer.is_closed()).await;
    }
}
