//! Session bootstrap.
//!
//! Discovery, transport, handshake and module wiring, in that order. A
//! [`Session`] is only handed out once the server assigned its identity.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::SessionConfig;
use crate::discovery::{Discovery, Endpoint};
use crate::error::SessionError;
use crate::module::{AnyModule, ModuleProps, ModuleRegistration, ModuleRegistry};
use crate::session::notice::{Notice, Notices};
use crate::session::{Session, SessionParts};
use crate::transport::Connector;

/// Builds sessions.
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    config: SessionConfig,
    discovery: Arc<dyn Discovery>,
    connector: Arc<dyn Connector>,
    registry: Arc<ModuleRegistry>,
    notices: Notices,
}

impl Bootstrapper {
    /// Creates a bootstrapper with its own module registry and notice hub.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] if the configuration is invalid.
    pub fn new(
        config: SessionConfig,
        discovery: Arc<dyn Discovery>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let notices = Notices::new(config.notice_capacity);
        Ok(Self {
            config,
            discovery,
            connector,
            registry: Arc::new(ModuleRegistry::new()),
            notices,
        })
    }

    /// Returns a copy using another discovery, sharing registry and notices.
    #[must_use]
    pub fn with_discovery(&self, discovery: Arc<dyn Discovery>) -> Self {
        Self {
            discovery,
            ..self.clone()
        }
    }

    /// Uses the given module registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ModuleRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Returns the session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the module registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Returns the notice hub.
    #[must_use]
    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    /// Asks discovery where to connect.
    ///
    /// Returns `Ok(None)` when the backend has no capacity left; a
    /// [`Notice::ResourceExhausted`] is published in that case.
    ///
    /// # Errors
    ///
    /// Returns the discovery error, or [`SessionError::Discovery`] if no
    /// host is known.
    pub async fn resolve(&self) -> Result<Option<Endpoint>, SessionError> {
        let reply = match self.discovery.discover().await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "endpoint discovery failed");
                return Err(e);
            }
        };

        let port = match reply.body.port(self.config.exhaustion_code) {
            Ok(port) => port,
            Err(SessionError::ResourceExhausted { code, message }) => {
                warn!(code, message = ?message, "backend has no capacity left");
                self.notices
                    .publish(Notice::ResourceExhausted { code, message });
                return Ok(None);
            }
            Err(e) => {
                error!(error = %e, "unusable discovery response");
                return Err(e);
            }
        };

        let (secure, host) = match &self.config.host {
            Some(raw) => Endpoint::split_host(raw),
            None => match reply.host {
                Some(host) => (reply.secure, host),
                None => {
                    let e = SessionError::Discovery("no host to connect to".to_string());
                    error!(error = %e, "endpoint discovery failed");
                    return Err(e);
                }
            },
        };

        Ok(Some(Endpoint::new(host, port).secure(secure)))
    }

    /// Discovers, connects, waits for the identity and wires `modules`.
    ///
    /// Returns `Ok(None)` when the backend has no capacity left; no transport
    /// is opened then. Modules that fail to build are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns the discovery, transport or handshake error.
    pub async fn acquire(
        &self,
        modules: &[ModuleRegistration],
        props: &ModuleProps,
    ) -> Result<Option<Session>, SessionError> {
        let Some(endpoint) = self.resolve().await? else {
            return Ok(None);
        };

        info!(endpoint = %endpoint, "opening transport");
        let connection = match self.connector.open(&endpoint).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(endpoint = %endpoint, error = %e, "failed to open transport");
                return Err(e);
            }
        };

        let parts = SessionParts {
            config: self.config.clone(),
            discovery: Arc::clone(&self.discovery),
            notices: self.notices.clone(),
        };
        let session = Session::establish(endpoint, connection, parts).await?;

        self.wire(&session, modules, props).await;
        Ok(Some(session))
    }

    /// Builds a fresh instance of every module against `session`.
    ///
    /// Returns the instances that were built.
    pub async fn wire(
        &self,
        session: &Session,
        modules: &[ModuleRegistration],
        props: &ModuleProps,
    ) -> Vec<(&'static str, AnyModule)> {
        let mut wired = Vec::with_capacity(modules.len());
        for registration in modules {
            match registration
                .build(&self.registry, session, props.clone(), false)
                .await
            {
                Ok(instance) => wired.push((registration.name(), instance)),
                Err(e) => {
                    error!(module = registration.name(), error = %e, "module wiring failed");
                }
            }
        }
        wired
    }
}
