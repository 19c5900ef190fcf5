//! Business modules sharing a session.
//!
//! A [`Module`] is any type that talks to the backend through a session. The
//! [`ModuleRegistry`] keeps at most one live instance per type and hands each
//! instance a [`SessionLink`], a non-owning handle to the session it was
//! built against.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Chat {
//!     link: SessionLink,
//!     room: String,
//! }
//!
//! #[async_trait]
//! impl Module for Chat {
//!     fn create(context: ModuleContext) -> Result<Self, SessionError> {
//!         let room = context.prop::<String>("room")?.unwrap_or_default();
//!         Ok(Self { link: context.into_link(), room })
//!     }
//! }
//! ```

pub mod registry;

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub use registry::{ModuleRegistry, ModuleSummary};

use crate::discovery::Endpoint;
use crate::error::SessionError;
use crate::session::{Session, WeakSession};

/// Properties merged into a module at construction.
pub type ModuleProps = Map<String, Value>;

/// Type-erased module instance.
pub type AnyModule = Arc<dyn Any + Send + Sync>;

/// A business module bound to a session.
#[async_trait]
pub trait Module: Send + Sync + Sized + 'static {
    /// Name used in logs and module maps.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Builds an instance from its context.
    ///
    /// # Errors
    ///
    /// Returns an error if the props are unusable.
    fn create(context: ModuleContext) -> Result<Self, SessionError>;

    /// Runs once after construction, before the instance is published.
    async fn init(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Everything a module is constructed with.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    name: &'static str,
    link: SessionLink,
    props: ModuleProps,
    endpoint: Endpoint,
}

impl ModuleContext {
    pub(crate) fn new(
        name: &'static str,
        link: SessionLink,
        props: ModuleProps,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            name,
            link,
            props,
            endpoint,
        }
    }

    /// Returns the module name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the link to the session.
    #[must_use]
    pub fn link(&self) -> &SessionLink {
        &self.link
    }

    /// Consumes the context, keeping only the session link.
    #[must_use]
    pub fn into_link(self) -> SessionLink {
        self.link
    }

    /// Returns the raw props.
    #[must_use]
    pub fn props(&self) -> &ModuleProps {
        &self.props
    }

    /// Returns the endpoint of the session.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the discovered port of the session.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.endpoint.port
    }

    /// Deserializes one prop, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Module`] if the prop has the wrong shape.
    pub fn prop<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        self.props
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| SessionError::Module {
                    name: self.name.to_string(),
                    message: format!("prop {}: {}", key, e),
                })
            })
            .transpose()
    }

    /// Deserializes all props into one struct.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Module`] if the props do not fit `T`.
    pub fn props_as<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        serde_json::from_value(Value::Object(self.props.clone())).map_err(|e| {
            SessionError::Module {
                name: self.name.to_string(),
                message: format!("props: {}", e),
            }
        })
    }
}

/// Non-owning handle from a module to its session.
///
/// Clones share the link; severing one severs all.
#[derive(Debug, Clone)]
pub struct SessionLink {
    session: Arc<RwLock<Option<WeakSession>>>,
}

impl SessionLink {
    /// Creates a link to `session`.
    #[must_use]
    pub fn new(session: &Session) -> Self {
        Self {
            session: Arc::new(RwLock::new(Some(session.downgrade()))),
        }
    }

    /// Returns the linked session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Detached`] after the link was severed and
    /// [`SessionError::SessionClosed`] once the session is gone.
    pub fn session(&self) -> Result<Session, SessionError> {
        let guard = self
            .session
            .read()
            .map_err(|_| SessionError::Detached)?;
        let weak = guard.as_ref().ok_or(SessionError::Detached)?;
        weak.upgrade().ok_or(SessionError::SessionClosed)
    }

    /// Emits through the linked session.
    ///
    /// # Errors
    ///
    /// See [`session`](Self::session) and [`Session::emit`].
    pub async fn emit(&self, event: &str, payload: Value) -> Result<(), SessionError> {
        self.session()?.emit(event, payload).await
    }

    /// Sends a correlated request through the linked session.
    ///
    /// # Errors
    ///
    /// See [`session`](Self::session) and [`Session::post`].
    pub async fn post(&self, event: &str, payload: Value) -> Result<Value, SessionError> {
        self.session()?.post(event, payload).await
    }

    /// Like [`post`](Self::post) with a deadline.
    ///
    /// # Errors
    ///
    /// See [`session`](Self::session) and [`Session::post_timeout`].
    pub async fn post_timeout(
        &self,
        event: &str,
        payload: Value,
        limit: Duration,
    ) -> Result<Value, SessionError> {
        self.session()?.post_timeout(event, payload, limit).await
    }

    /// Returns true while the link is attached and the session alive.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.session().is_ok()
    }

    /// Detaches the link. The session itself is left alone.
    pub fn sever(&self) {
        if let Ok(mut guard) = self.session.write() {
            *guard = None;
        }
    }
}

type BuildFn = for<'a> fn(
    &'a ModuleRegistry,
    &'a Session,
    ModuleProps,
    bool,
) -> BoxFuture<'a, Result<AnyModule, SessionError>>;

/// Type-erased factory for a [`Module`] type.
#[derive(Clone, Copy)]
pub struct ModuleRegistration {
    name: &'static str,
    type_id: TypeId,
    build: BuildFn,
}

impl ModuleRegistration {
    /// Registration for module type `T`.
    #[must_use]
    pub fn of<T: Module>() -> Self {
        Self {
            name: T::name(),
            type_id: TypeId::of::<T>(),
            build: build_module::<T>,
        }
    }

    /// Returns the module name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the module type id.
    #[must_use]
    pub fn module_type(&self) -> TypeId {
        self.type_id
    }

    /// Gets or builds the module through `registry`.
    ///
    /// # Errors
    ///
    /// Returns the error of the module constructor or init hook.
    pub async fn build(
        &self,
        registry: &ModuleRegistry,
        session: &Session,
        props: ModuleProps,
        lock: bool,
    ) -> Result<AnyModule, SessionError> {
        (self.build)(registry, session, props, lock).await
    }
}

impl fmt::Debug for ModuleRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistration")
            .field("name", &self.name)
            .finish()
    }
}

fn build_module<'a, T: Module>(
    registry: &'a ModuleRegistry,
    session: &'a Session,
    props: ModuleProps,
    lock: bool,
) -> BoxFuture<'a, Result<AnyModule, SessionError>> {
    Box::pin(async move {
        let instance = registry.get::<T>(session, props, lock).await?;
        Ok(instance as AnyModule)
    })
}
