//! Switchboard SDK - client session layer for socket backends.
//!
//! A backend is asked where to connect, a socket is opened, the server
//! assigns the session an identity, and from then on every outbound message
//! carries that identity while requests are matched to their responses by
//! id.
//!
//! # Components
//!
//! - [`Discovery`] - asks the backend for an endpoint ([`HttpDiscovery`],
//!   [`StaticDiscovery`])
//! - [`Connector`] / [`Transport`] - message transports ([`WsConnector`],
//!   [`MemoryConnector`])
//! - [`Bootstrapper`] - discovery, connect, handshake, module wiring
//! - [`Session`] - identity, stamping, [`Session::post`] correlation,
//!   heartbeat and teardown
//! - [`ModuleRegistry`] - one live instance per [`Module`] type
//! - [`SessionManager`] - the shared session and dedicated module sessions
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use switchboard_sdk::{AcquireOptions, DiscoveryConfig, SessionConfig, SessionManager, WsConfig};
//!
//! let manager = SessionManager::over_http(
//!     DiscoveryConfig::new("http://10.2.118.164:8080/port"),
//!     SessionConfig::default(),
//!     WsConfig::default(),
//! )?;
//!
//! if let Some(session) = manager.instance(AcquireOptions::default()).await? {
//!     let reply = session.post("echo", json!({"x": 1})).await?;
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod module;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use bootstrap::Bootstrapper;
pub use config::{ProtocolConfig, SessionConfig};
pub use discovery::{
    Discovery, DiscoveryConfig, DiscoveryReply, DiscoveryResponse, Endpoint, HttpDiscovery,
    StaticDiscovery,
};
pub use error::SessionError;
pub use manager::{AcquireOptions, DedicatedSpec, ModuleMap, SessionManager};
pub use module::{
    Module, ModuleContext, ModuleProps, ModuleRegistration, ModuleRegistry, SessionLink,
};
pub use session::{InboundMessage, Notice, Session, SessionState, WeakSession};
pub use transport::{
    Connection, Connector, Frame, MemoryConnector, MemoryPeer, MemoryServer, Transport,
    TransportEvent, WsConfig, WsConnector,
};
