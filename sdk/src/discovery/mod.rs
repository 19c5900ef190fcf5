//! Endpoint discovery.
//!
//! Before a socket is opened the backend is asked where to connect. The
//! answer names a port (and implicitly a host: the one that answered) or
//! reports that the backend has no capacity left.
//!
//! # Example
//!
//! ```rust,ignore
//! use switchboard_sdk::discovery::{Discovery, DiscoveryConfig, HttpDiscovery};
//!
//! let discovery = HttpDiscovery::new(DiscoveryConfig::new("http://10.2.118.164:8080/port"))?;
//! let reply = discovery.discover().await?;
//! let port = reply.body.port(2002)?;
//! ```

pub mod config;
pub mod http;
pub mod response;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

pub use config::DiscoveryConfig;
pub use http::HttpDiscovery;
pub use response::{DiscoveryResponse, PortField, PortStatus};

use crate::error::SessionError;

/// Where a socket can be opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or address, without scheme or port.
    pub host: String,
    /// Socket port.
    pub port: u16,
    /// Whether TLS is used (`wss`/`https`).
    pub secure: bool,
}

impl Endpoint {
    /// Creates a plain-text endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            secure: false,
        }
    }

    /// Marks the endpoint as using TLS.
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Splits a host override such as `https://10.0.0.1:8080/` into its TLS
    /// flag and bare host.
    #[must_use]
    pub fn split_host(raw: &str) -> (bool, String) {
        let raw = raw.trim();
        let schemes = [
            ("https://", true),
            ("wss://", true),
            ("http://", false),
            ("ws://", false),
        ];
        let (secure, rest) = schemes
            .iter()
            .find_map(|&(scheme, secure)| raw.strip_prefix(scheme).map(|rest| (secure, rest)))
            .unwrap_or((false, raw));

        let authority = rest.split('/').next().unwrap_or(rest);
        let host = if authority.starts_with('[') {
            // bracketed IPv6 literal, keep the brackets
            authority
                .find(']')
                .and_then(|end| authority.get(..=end))
                .unwrap_or(authority)
        } else {
            authority.split(':').next().unwrap_or(authority)
        };

        (secure, host.to_string())
    }

    /// Returns the socket URL for the given path.
    #[must_use]
    pub fn socket_url(&self, path: &str) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}/{}", scheme, self.host, self.port, path.trim_start_matches('/'))
    }

    /// Returns the HTTP URL of the socket endpoint for the given path.
    #[must_use]
    pub fn http_url(&self, path: &str) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}/{}", scheme, self.host, self.port, path.trim_start_matches('/'))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Result of one discovery call.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryReply {
    /// Host that answered the discovery call, if known.
    pub host: Option<String>,
    /// Whether the discovery call used TLS.
    pub secure: bool,
    /// Response body.
    pub body: DiscoveryResponse,
}

impl DiscoveryReply {
    /// Creates a reply answered by the given host.
    #[must_use]
    pub fn new(host: impl Into<String>, body: DiscoveryResponse) -> Self {
        Self {
            host: Some(host.into()),
            secure: false,
            body,
        }
    }
}

/// Source of socket endpoints.
#[async_trait]
pub trait Discovery: Send + Sync + fmt::Debug {
    /// Asks the backend where to connect.
    async fn discover(&self) -> Result<DiscoveryReply, SessionError>;

    /// Tells the backend an identity is disconnecting on purpose.
    async fn notify_disconnect(&self, endpoint: &Endpoint, identity: &str)
        -> Result<(), SessionError>;
}

/// Discovery with a fixed answer.
///
/// Used where the endpoint is known up front, and in tests.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    reply: Result<DiscoveryReply, SessionError>,
    calls: Arc<AtomicUsize>,
    notices: Arc<Mutex<Vec<(Endpoint, String)>>>,
}

impl StaticDiscovery {
    /// Creates a discovery that always returns the given reply.
    #[must_use]
    pub fn new(reply: DiscoveryReply) -> Self {
        Self::from_result(Ok(reply))
    }

    /// Creates a discovery announcing `port` on `host`.
    #[must_use]
    pub fn port(host: impl Into<String>, port: u16) -> Self {
        Self::new(DiscoveryReply::new(host, DiscoveryResponse::with_port(port)))
    }

    /// Creates a discovery that always fails with the given error.
    #[must_use]
    pub fn failing(error: SessionError) -> Self {
        Self::from_result(Err(error))
    }

    fn from_result(reply: Result<DiscoveryReply, SessionError>) -> Self {
        Self {
            reply,
            calls: Arc::new(AtomicUsize::new(0)),
            notices: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns how many times `discover` was called.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the disconnect notices received so far.
    #[must_use]
    pub fn notices(&self) -> Vec<(Endpoint, String)> {
        self.notices
            .lock()
            .map(|notices| notices.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self) -> Result<DiscoveryReply, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }

    async fn notify_disconnect(
        &self,
        endpoint: &Endpoint,
        identity: &str,
    ) -> Result<(), SessionError> {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push((endpoint.clone(), identity.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_bare() {
        assert_eq!(
            Endpoint::split_host("10.2.118.164"),
            (false, "10.2.118.164".to_string())
        );
    }

    #[test]
    fn test_split_host_with_scheme_and_port() {
        assert_eq!(
            Endpoint::split_host("https://gateway.example:8443/app/"),
            (true, "gateway.example".to_string())
        );
        assert_eq!(
            Endpoint::split_host("ws://127.0.0.1:9000"),
            (false, "127.0.0.1".to_string())
        );
    }

    #[test]
    fn test_split_host_ipv6() {
        assert_eq!(
            Endpoint::split_host("http://[::1]:8080/"),
            (false, "[::1]".to_string())
        );
    }

    #[test]
    fn test_endpoint_urls() {
        let endpoint = Endpoint::new("127.0.0.1", 9100);
        assert_eq!(endpoint.socket_url("/"), "ws://127.0.0.1:9100/");
        assert_eq!(
            endpoint.http_url("_socket/disconnect"),
            "http://127.0.0.1:9100/_socket/disconnect"
        );

        let endpoint = endpoint.secure(true);
        assert_eq!(endpoint.socket_url("stream"), "wss://127.0.0.1:9100/stream");
        assert_eq!(endpoint.to_string(), "127.0.0.1:9100");
    }

    #[tokio::test]
    async fn test_static_discovery_counts_calls() {
        let discovery = StaticDiscovery::port("127.0.0.1", 9100);
        let reply = discovery.discover().await.expect("reply");
        assert_eq!(reply.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(reply.body.port(2002), Ok(9100));

        let _ = discovery.discover().await;
        assert_eq!(discovery.calls(), 2);
    }

    #[tokio::test]
    async fn test_static_discovery_failing() {
        let discovery = StaticDiscovery::failing(SessionError::Discovery("down".to_string()));
        tokio_test::assert_err!(discovery.discover().await);
        assert_eq!(discovery.calls(), 1);
    }

    #[tokio::test]
    async fn test_static_discovery_records_notices() {
        let discovery = StaticDiscovery::port("127.0.0.1", 9100);
        let endpoint = Endpoint::new("127.0.0.1", 9100);
        tokio_test::assert_ok!(discovery.notify_disconnect(&endpoint, "sess-1").await);
        assert_eq!(discovery.notices(), vec![(endpoint, "sess-1".to_string())]);
    }
}
