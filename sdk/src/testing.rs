//! Test helpers: sessions over the in-process transport.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::bootstrap::Bootstrapper;
use crate::config::SessionConfig;
use crate::discovery::{Discovery, StaticDiscovery};
use crate::module::ModuleProps;
use crate::session::Session;
use crate::transport::{Frame, MemoryConnector, MemoryPeer, MemoryServer};

const WAIT: Duration = Duration::from_secs(5);

pub(crate) struct Harness {
    pub(crate) connector: MemoryConnector,
    pub(crate) server: MemoryServer,
    pub(crate) discovery: Arc<StaticDiscovery>,
    pub(crate) bootstrapper: Bootstrapper,
}

impl Harness {
    /// Discovery announcing port 9100 on 127.0.0.1.
    pub(crate) fn new(config: SessionConfig) -> Self {
        Self::with_discovery(config, StaticDiscovery::port("127.0.0.1", 9100))
    }

    pub(crate) fn with_discovery(config: SessionConfig, discovery: StaticDiscovery) -> Self {
        let (connector, server) = MemoryConnector::new();
        let discovery = Arc::new(discovery);
        let bootstrapper = Bootstrapper::new(
            config,
            Arc::clone(&discovery) as Arc<dyn Discovery>,
            Arc::new(connector.clone()),
        )
        .expect("valid config");

        Self {
            connector,
            server,
            discovery,
            bootstrapper,
        }
    }
}

/// Accepts the next connection and assigns `identity` to it.
pub(crate) async fn greet(server: &mut MemoryServer, identity: &str) -> MemoryPeer {
    let peer = tokio::time::timeout(WAIT, server.accept())
        .await
        .expect("connection in time")
        .expect("peer");
    assert!(peer.send("identity", json!(identity)).await);
    peer
}

/// An active session with identity `sess-42` at 127.0.0.1:9100.
pub(crate) async fn active_session(config: SessionConfig) -> (Session, MemoryPeer, Harness) {
    let mut harness = Harness::new(config);
    let bootstrapper = harness.bootstrapper.clone();
    let task = tokio::spawn(async move { bootstrapper.acquire(&[], &ModuleProps::new()).await });

    let peer = greet(&mut harness.server, "sess-42").await;
    let session = task
        .await
        .expect("join")
        .expect("acquire")
        .expect("session");
    (session, peer, harness)
}

pub(crate) async fn next_frame(peer: &mut MemoryPeer) -> Frame {
    tokio::time::timeout(WAIT, peer.recv())
        .await
        .expect("frame in time")
        .expect("frame")
}

pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
