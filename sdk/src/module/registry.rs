//! Per-type module singletons.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{AnyModule, Module, ModuleContext, ModuleProps, SessionLink};
use crate::error::SessionError;
use crate::session::Session;

#[derive(Debug)]
struct ModuleEntry {
    name: &'static str,
    instance: AnyModule,
    link: SessionLink,
    locked: bool,
}

/// Name and lock flag of a registered module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSummary {
    /// Module name.
    pub name: &'static str,
    /// Whether the instance was requested with `lock`.
    pub locked: bool,
    /// Whether the instance is still bound to a live session.
    pub attached: bool,
}

/// At most one live instance per module type.
///
/// Builds of one type are serialised by a per-type gate; the entry map is
/// only locked for lookups and the final swap. A module's `init` may use
/// the registry for other types, but must not request its own type.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    entries: Mutex<HashMap<TypeId, ModuleEntry>>,
    gates: Mutex<HashMap<TypeId, Arc<Mutex<()>>>>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the instance of `T`, building it when needed.
    ///
    /// With `lock`, a live instance is returned as is. Without it, the old
    /// instance is detached from its session and a new one is built against
    /// `session`, initialised and stored in its place. Creation is serialised,
    /// so concurrent calls never build two instances.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Module`] if construction or init fails; the
    /// previous entry is kept in that case.
    pub async fn get<T: Module>(
        &self,
        session: &Session,
        props: ModuleProps,
        lock: bool,
    ) -> Result<Arc<T>, SessionError> {
        let key = TypeId::of::<T>();
        let gate = self.gate(key).await;
        let _building = gate.lock().await;

        if lock {
            if let Some(instance) = self.live::<T>(key).await {
                debug!(module = T::name(), "reusing module instance");
                return Ok(instance);
            }
        }

        let name = T::name();
        let link = SessionLink::new(session);
        let context = ModuleContext::new(name, link.clone(), props, session.endpoint().clone());

        let instance = T::create(context).map_err(|e| wrap(name, e))?;
        instance.init().await.map_err(|e| wrap(name, e))?;
        let instance = Arc::new(instance);

        let previous = self.entries.lock().await.insert(
            key,
            ModuleEntry {
                name,
                instance: Arc::clone(&instance) as AnyModule,
                link,
                locked: lock,
            },
        );
        if let Some(previous) = previous {
            previous.link.sever();
            info!(module = name, "replaced module instance");
        } else {
            info!(module = name, port = session.endpoint().port, "module wired");
        }

        Ok(instance)
    }

    async fn gate(&self, key: TypeId) -> Arc<Mutex<()>> {
        Arc::clone(self.gates.lock().await.entry(key).or_default())
    }

    async fn live<T: Module>(&self, key: TypeId) -> Option<Arc<T>> {
        let entries = self.entries.lock().await;
        let entry = entries.get(&key).filter(|entry| entry.link.is_attached())?;
        Arc::clone(&entry.instance).downcast::<T>().ok()
    }

    /// Returns the current instance of `T`, if any.
    pub async fn existing<T: Module>(&self) -> Option<Arc<T>> {
        let entries = self.entries.lock().await;
        entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| Arc::clone(&entry.instance).downcast::<T>().ok())
    }

    /// Returns true if an instance of the given type is registered.
    pub async fn contains(&self, type_id: TypeId) -> bool {
        self.entries.lock().await.contains_key(&type_id)
    }

    /// Removes and detaches the instance of `T`.
    pub async fn remove<T: Module>(&self) -> Option<Arc<T>> {
        let entry = self.entries.lock().await.remove(&TypeId::of::<T>())?;
        entry.link.sever();
        entry.instance.downcast::<T>().ok()
    }

    /// Lists the registered modules, sorted by name.
    pub async fn summaries(&self) -> Vec<ModuleSummary> {
        let entries = self.entries.lock().await;
        let mut summaries: Vec<_> = entries
            .values()
            .map(|entry| ModuleSummary {
                name: entry.name,
                locked: entry.locked,
                attached: entry.link.is_attached(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(b.name));
        summaries
    }

    /// Returns the number of registered modules.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns true if no module is registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

fn wrap(name: &'static str, error: SessionError) -> SessionError {
    match error {
        SessionError::Module { .. } => error,
        other => SessionError::Module {
            name: name.to_string(),
            message: other.to_string(),
        },
    }
}
