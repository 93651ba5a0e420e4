//! Dependency Injection Container
//!
//! Service registry with three scopes: process-wide singletons, per-session
//! instances cached under `"{session_id}:{name}"`, and transients created on
//! every resolve. Session teardown removes every cache entry for that id;
//! `update_session_service` swaps one entry atomically so a provider can be
//! replaced mid-session.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::EngineError;

/// Erased service value.
pub type AnyService = Arc<dyn Any + Send + Sync>;

/// Factory invoked to create a service instance.
///
/// Receives the container (for nested resolution) and the session id for
/// session-scoped services.
pub type ServiceFactory =
    Arc<dyn Fn(&DIContainer, Option<&str>) -> Result<AnyService, EngineError> + Send + Sync>;

/// Service lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// One instance for the whole process.
    Singleton,
    /// One instance per session, cached until `cleanup_session`.
    Session,
    /// A fresh instance on every resolve.
    Transient,
}

struct ServiceDescriptor {
    scope: Scope,
    factory: Option<ServiceFactory>,
    /// Cached instance for singletons.
    instance: RwLock<Option<AnyService>>,
}

/// Service registry and per-session cache.
pub struct DIContainer {
    services: RwLock<HashMap<String, Arc<ServiceDescriptor>>>,
    /// `"{session_id}:{name}"` → instance.
    session_services: RwLock<HashMap<String, AnyService>>,
}

impl Default for DIContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl DIContainer {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            session_services: RwLock::new(HashMap::new()),
        }
    }

    fn session_key(session_id: &str, name: &str) -> String {
        format!("{session_id}:{name}")
    }

    /// Erase a trait-object port for registration.
    pub fn port<P: ?Sized + 'static>(port: Arc<P>) -> AnyService
    where
        Arc<P>: Send + Sync,
    {
        Arc::new(port)
    }

    /// Register a process-wide instance.
    pub fn register_instance(&self, name: impl Into<String>, instance: AnyService) {
        let name = name.into();
        tracing::debug!(service = %name, "registering singleton instance");
        self.services.write().insert(
            name,
            Arc::new(ServiceDescriptor {
                scope: Scope::Singleton,
                factory: None,
                instance: RwLock::new(Some(instance)),
            }),
        );
    }

    /// Register a factory with the given scope.
    pub fn register_factory(
        &self,
        name: impl Into<String>,
        scope: Scope,
        factory: ServiceFactory,
    ) {
        let name = name.into();
        tracing::debug!(service = %name, ?scope, "registering factory");
        self.services.write().insert(
            name,
            Arc::new(ServiceDescriptor {
                scope,
                factory: Some(factory),
                instance: RwLock::new(None),
            }),
        );
    }

    /// Place an instance directly into one session's cache.
    ///
    /// Used for the session context and lifecycle manager, which are built by
    /// the session manager rather than by a factory.
    pub fn register_session_instance(
        &self,
        session_id: &str,
        name: &str,
        instance: AnyService,
    ) {
        self.session_services
            .write()
            .insert(Self::session_key(session_id, name), instance);
    }

    /// Atomically replace one session's cached service (provider hot swap).
    pub fn update_session_service(&self, session_id: &str, name: &str, instance: AnyService) {
        let key = Self::session_key(session_id, name);
        tracing::info!(session_id = %session_id, service = %name, "hot-swapping session service");
        self.session_services.write().insert(key, instance);
    }

    /// Resolve the erased service value.
    pub fn resolve_any(
        &self,
        name: &str,
        session_id: Option<&str>,
    ) -> Result<AnyService, EngineError> {
        // Directly-registered session entries win over factories, mirroring
        // how the session context itself is resolved.
        if let Some(session_id) = session_id {
            if let Some(instance) = self
                .session_services
                .read()
                .get(&Self::session_key(session_id, name))
            {
                return Ok(instance.clone());
            }
        }

        let descriptor = self
            .services
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::ServiceNotRegistered(name.to_string()))?;

        match descriptor.scope {
            Scope::Singleton => {
                if let Some(instance) = descriptor.instance.read().clone() {
                    return Ok(instance);
                }
                let factory = descriptor
                    .factory
                    .clone()
                    .ok_or_else(|| EngineError::ServiceNotRegistered(name.to_string()))?;
                let instance = factory(self, None)?;
                let mut slot = descriptor.instance.write();
                // Another resolver may have won the race; first write wins.
                if let Some(existing) = slot.clone() {
                    return Ok(existing);
                }
                *slot = Some(instance.clone());
                Ok(instance)
            }
            Scope::Session => {
                let session_id = session_id
                    .ok_or_else(|| EngineError::SessionIdRequired(name.to_string()))?;
                let key = Self::session_key(session_id, name);
                if let Some(instance) = self.session_services.read().get(&key) {
                    return Ok(instance.clone());
                }
                let factory = descriptor
                    .factory
                    .clone()
                    .ok_or_else(|| EngineError::ServiceNotRegistered(name.to_string()))?;
                let instance = factory(self, Some(session_id))?;
                let mut cache = self.session_services.write();
                if let Some(existing) = cache.get(&key) {
                    return Ok(existing.clone());
                }
                cache.insert(key, instance.clone());
                Ok(instance)
            }
            Scope::Transient => {
                let factory = descriptor
                    .factory
                    .clone()
                    .ok_or_else(|| EngineError::ServiceNotRegistered(name.to_string()))?;
                factory(self, session_id)
            }
        }
    }

    /// Resolve a concrete service registered as `Arc<T>`.
    pub fn resolve<T: Any + Send + Sync>(
        &self,
        name: &str,
        session_id: Option<&str>,
    ) -> Result<Arc<T>, EngineError> {
        self.resolve_any(name, session_id)?
            .downcast::<T>()
            .map_err(|_| EngineError::ServiceType {
                name: name.to_string(),
            })
    }

    /// Resolve a trait-object port registered through [`DIContainer::port`].
    pub fn resolve_port<P: ?Sized + 'static>(
        &self,
        name: &str,
        session_id: Option<&str>,
    ) -> Result<Arc<P>, EngineError> {
        let any = self.resolve_any(name, session_id)?;
        any.downcast_ref::<Arc<P>>()
            .cloned()
            .ok_or_else(|| EngineError::ServiceType {
                name: name.to_string(),
            })
    }

    /// Drop one session's cached entry so the next resolve rebuilds it.
    pub fn remove_session_service(&self, session_id: &str, name: &str) -> bool {
        self.session_services
            .write()
            .remove(&Self::session_key(session_id, name))
            .is_some()
    }

    /// Remove every cached entry belonging to a session.
    pub fn cleanup_session(&self, session_id: &str) {
        let prefix = format!("{session_id}:");
        let mut cache = self.session_services.write();
        let before = cache.len();
        cache.retain(|key, _| !key.starts_with(&prefix));
        let removed = before - cache.len();
        if removed > 0 {
            tracing::debug!(session_id = %session_id, removed, "cleaned session services");
        }
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.read().contains_key(name)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    /// Number of cached entries for one session. Diagnostic only.
    pub fn session_service_count(&self, session_id: &str) -> usize {
        let prefix = format!("{session_id}:");
        self.session_services
            .read()
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .count()
    }
}
