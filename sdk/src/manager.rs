//! Session manager.
//!
//! Owns the shared session and the dedicated per-module sessions of an
//! application, so callers never keep session state in globals.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = SessionManager::over_http(
//!     DiscoveryConfig::new("http://10.2.118.164:8080/port"),
//!     SessionConfig::default(),
//!     WsConfig::default(),
//! )?;
//!
//! let options = AcquireOptions::new().with_module::<Chat>();
//! if let Some(session) = manager.instance(options).await? {
//!     let reply = session.post("echo", json!({"x": 1})).await?;
//! }
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::bootstrap::Bootstrapper;
use crate::config::SessionConfig;
use crate::discovery::{Discovery, DiscoveryConfig, HttpDiscovery};
use crate::error::SessionError;
use crate::module::{AnyModule, Module, ModuleProps, ModuleRegistration, ModuleRegistry};
use crate::session::notice::Notice;
use crate::session::Session;
use crate::transport::{WsConfig, WsConnector};

/// Options for [`SessionManager::instance`].
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// Reuse the current session while it is active.
    pub lock: bool,
    /// Modules wired into a freshly created session.
    pub modules: Vec<ModuleRegistration>,
    /// Props handed to every wired module.
    pub props: ModuleProps,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            lock: true,
            modules: Vec::new(),
            props: ModuleProps::new(),
        }
    }
}

impl AcquireOptions {
    /// Locked acquisition without modules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock flag.
    #[must_use]
    pub fn with_lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    /// Adds a module to wire.
    #[must_use]
    pub fn with_module<T: Module>(mut self) -> Self {
        self.modules.push(ModuleRegistration::of::<T>());
        self
    }

    /// Sets the module props.
    #[must_use]
    pub fn with_props(mut self, props: ModuleProps) -> Self {
        self.props = props;
        self
    }
}

/// One module with its own session.
#[derive(Debug, Clone)]
pub struct DedicatedSpec {
    /// The module to build.
    pub registration: ModuleRegistration,
    /// Where the module's session is discovered.
    pub discovery: Arc<dyn Discovery>,
    /// Props handed to the module.
    pub props: ModuleProps,
}

impl DedicatedSpec {
    /// Spec for module `T` discovered through `discovery`.
    #[must_use]
    pub fn new<T: Module>(discovery: Arc<dyn Discovery>) -> Self {
        Self {
            registration: ModuleRegistration::of::<T>(),
            discovery,
            props: ModuleProps::new(),
        }
    }

    /// Sets the module props.
    #[must_use]
    pub fn with_props(mut self, props: ModuleProps) -> Self {
        self.props = props;
        self
    }
}

/// Read-only map from module name to instance.
#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    modules: Arc<HashMap<&'static str, AnyModule>>,
}

impl ModuleMap {
    /// Returns the instance of `T`.
    #[must_use]
    pub fn get<T: Module>(&self) -> Option<Arc<T>> {
        self.modules
            .get(T::name())
            .and_then(|instance| Arc::clone(instance).downcast::<T>().ok())
    }

    /// Returns the instance registered under `name`.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&AnyModule> {
        self.modules.get(name)
    }

    /// Returns true if a module with that name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Returns the module names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.modules.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[derive(Debug)]
struct DedicatedEntry {
    name: &'static str,
    session: Session,
    instance: AnyModule,
}

/// Hands out the shared session and dedicated module sessions.
///
/// Acquisitions are serialized by their own locks; the session slots are
/// only locked briefly, so [`current`](Self::current) and
/// [`shutdown`](Self::shutdown) never wait on a handshake.
#[derive(Debug)]
pub struct SessionManager {
    bootstrapper: Bootstrapper,
    acquiring: Mutex<()>,
    dedicating: Mutex<()>,
    current: Mutex<Option<Session>>,
    last_scope: Mutex<Option<String>>,
    dedicated: Mutex<HashMap<TypeId, DedicatedEntry>>,
    /// Bumped by every shutdown; cancels acquisitions started before it.
    epoch: watch::Sender<u64>,
}

impl SessionManager {
    /// Creates a manager around `bootstrapper`.
    #[must_use]
    pub fn new(bootstrapper: Bootstrapper) -> Self {
        Self {
            bootstrapper,
            acquiring: Mutex::new(()),
            dedicating: Mutex::new(()),
            current: Mutex::new(None),
            last_scope: Mutex::new(None),
            dedicated: Mutex::new(HashMap::new()),
            epoch: watch::channel(0).0,
        }
    }

    /// Creates a manager using HTTP discovery and WebSocket transports.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] if any configuration is invalid.
    pub fn over_http(
        discovery: DiscoveryConfig,
        session: SessionConfig,
        ws: WsConfig,
    ) -> Result<Self, SessionError> {
        let discovery = HttpDiscovery::new(discovery)?;
        let connector = WsConnector::new(ws)?;
        let bootstrapper = Bootstrapper::new(session, Arc::new(discovery), Arc::new(connector))?;
        Ok(Self::new(bootstrapper))
    }

    /// Returns the bootstrapper.
    #[must_use]
    pub fn bootstrapper(&self) -> &Bootstrapper {
        &self.bootstrapper
    }

    /// Returns the module registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        self.bootstrapper.registry()
    }

    /// Subscribes to user-facing notices.
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.bootstrapper.notices().subscribe()
    }

    /// Returns the shared session, if one was acquired.
    pub async fn current(&self) -> Option<Session> {
        self.current.lock().await.clone()
    }

    /// Returns the registered instance of module `T`.
    pub async fn module<T: Module>(&self) -> Option<Arc<T>> {
        self.registry().existing::<T>().await
    }

    /// Returns the shared session, creating it when needed.
    ///
    /// With `lock` and an active current session, that session is returned.
    /// Otherwise the current session is destroyed and a new one bootstrapped.
    /// Concurrent callers wait for the same acquisition.
    ///
    /// Returns `Ok(None)` when the backend has no capacity left.
    ///
    /// # Errors
    ///
    /// Returns the discovery, transport or handshake error.
    pub async fn instance(&self, options: AcquireOptions) -> Result<Option<Session>, SessionError> {
        let _acquiring = self.acquiring.lock().await;
        self.acquire_current(options, None).await
    }

    /// Like [`instance`](Self::instance), but recreates the session when
    /// `scope` differs from the scope of the last acquisition.
    ///
    /// # Errors
    ///
    /// Returns the discovery, transport or handshake error.
    pub async fn instance_for_scope(
        &self,
        scope: &str,
        mut options: AcquireOptions,
    ) -> Result<Option<Session>, SessionError> {
        let _acquiring = self.acquiring.lock().await;

        if let Some(previous) = self.last_scope.lock().await.as_deref() {
            if previous != scope {
                info!(previous, scope, "scope changed, recreating session");
                options.lock = false;
            }
        }

        self.acquire_current(options, Some(scope)).await
    }

    /// Runs one acquisition of the shared session. Callers hold `acquiring`.
    async fn acquire_current(
        &self,
        options: AcquireOptions,
        scope: Option<&str>,
    ) -> Result<Option<Session>, SessionError> {
        let mut epoch = self.epoch.subscribe();
        let started = *epoch.borrow_and_update();

        if options.lock {
            if let Some(session) = self.current().await {
                if session.is_active().await {
                    debug!(endpoint = %session.endpoint(), "reusing active session");
                    return Ok(Some(session));
                }
            }
        }

        let previous = self.current.lock().await.take();
        if let Some(previous) = previous {
            previous.destroy().await;
        }

        let acquisition = self.bootstrapper.acquire(&options.modules, &options.props);
        let Some(session) = Self::until_shutdown(&mut epoch, acquisition).await? else {
            return Ok(None);
        };

        let mut current = self.current.lock().await;
        if *self.epoch.borrow() != started {
            drop(current);
            session.destroy().await;
            return Err(SessionError::SessionClosed);
        }
        *current = Some(session.clone());
        drop(current);

        if let Some(scope) = scope {
            *self.last_scope.lock().await = Some(scope.to_string());
        }
        Ok(Some(session))
    }

    /// Drives `acquisition` unless a shutdown starts first.
    async fn until_shutdown<F>(
        epoch: &mut watch::Receiver<u64>,
        acquisition: F,
    ) -> Result<Option<Session>, SessionError>
    where
        F: Future<Output = Result<Option<Session>, SessionError>>,
    {
        tokio::select! {
            result = acquisition => result,
            _ = epoch.changed() => {
                warn!("acquisition cancelled by shutdown");
                Err(SessionError::SessionClosed)
            }
        }
    }

    /// Gives every module its own session.
    ///
    /// Each entry is discovered through its own discovery. Modules that
    /// already have an active session are kept. Exhausted entries and modules
    /// that fail to build are skipped. Returns every dedicated module wired so far.
    ///
    /// # Errors
    ///
    /// Returns the first discovery, transport or handshake error.
    pub async fn dedicated(&self, specs: Vec<DedicatedSpec>) -> Result<ModuleMap, SessionError> {
        let _dedicating = self.dedicating.lock().await;
        let mut epoch = self.epoch.subscribe();
        let started = *epoch.borrow_and_update();

        for spec in specs {
            let name = spec.registration.name();
            let key = spec.registration.module_type();

            let existing = self
                .dedicated
                .lock()
                .await
                .get(&key)
                .map(|entry| entry.session.clone());
            if let Some(session) = existing {
                if session.is_active().await {
                    debug!(module = name, "module already has a session");
                    continue;
                }
            }

            let bootstrapper = self.bootstrapper.with_discovery(spec.discovery);
            let no_props = ModuleProps::new();
            let acquisition = bootstrapper.acquire(&[], &no_props);
            let Some(session) = Self::until_shutdown(&mut epoch, acquisition).await? else {
                warn!(module = name, "no capacity left, module skipped");
                continue;
            };

            match spec
                .registration
                .build(self.registry(), &session, spec.props, false)
                .await
            {
                Ok(instance) => {
                    let mut dedicated = self.dedicated.lock().await;
                    if *self.epoch.borrow() != started {
                        drop(dedicated);
                        session.destroy().await;
                        return Err(SessionError::SessionClosed);
                    }
                    info!(module = name, endpoint = %session.endpoint(), "dedicated session ready");
                    let entry = DedicatedEntry {
                        name,
                        session,
                        instance,
                    };
                    let previous = dedicated.insert(key, entry);
                    drop(dedicated);
                    if let Some(previous) = previous {
                        previous.session.destroy().await;
                    }
                }
                Err(e) => {
                    error!(module = name, error = %e, "module wiring failed");
                    session.destroy().await;
                }
            }
        }

        let modules = self
            .dedicated
            .lock()
            .await
            .values()
            .map(|entry| (entry.name, Arc::clone(&entry.instance)))
            .collect();
        Ok(ModuleMap {
            modules: Arc::new(modules),
        })
    }

    /// Destroys the shared and every dedicated session.
    ///
    /// Acquisitions still waiting on discovery or a handshake fail with
    /// [`SessionError::SessionClosed`].
    pub async fn shutdown(&self) {
        self.epoch.send_modify(|epoch| *epoch = epoch.wrapping_add(1));

        let current = self.current.lock().await.take();
        if let Some(session) = current {
            session.destroy().await;
        }
        *self.last_scope.lock().await = None;

        let entries: Vec<_> = self.dedicated.lock().await.drain().collect();
        for (_, entry) in entries {
            entry.session.destroy().await;
        }
        info!("session manager shut down");
    }
}
