//! # In-Memory Engine
//!
//! A complete [`Engine`] that runs bundles inside the host process.
//!
//! Bundle code is supplied by the host as [`Activator`]s registered under the
//! name a package declares in `Bundle-Activator`. Starting a bundle runs its
//! activator, which publishes typed services through an [`ActivatorContext`].
//! Stopping it withdraws those services.
//!
//! Every service registration carries a use count in the OSGi manner:
//! `acquire` increments it, `release` decrements it and reports `false` once
//! there is nothing left to release.

use super::{
    Engine, EngineError, EngineFactory, EngineHandle, ServiceInterface, ServiceObject,
    ServiceReference, erase,
};
use crate::config::EngineConfig;
use crate::package::{BundleDescriptor, PackageReader};
use crate::{Origin, ServiceId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use thiserror::Error;

// =============================================================================
// ACTIVATORS
// =============================================================================

/// Failure reported by activator code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ActivatorError(String);

impl ActivatorError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// What an activator sees while its bundle starts or stops.
pub struct ActivatorContext<'a> {
    origin: &'a Origin,
    exports: &'a BTreeSet<String>,
    published: Vec<(ServiceInterface, ServiceObject)>,
}

impl<'a> ActivatorContext<'a> {
    fn new(origin: &'a Origin, exports: &'a BTreeSet<String>) -> Self {
        Self {
            origin,
            exports,
            published: Vec::new(),
        }
    }

    /// Origin of the bundle being started or stopped.
    #[must_use]
    pub fn origin(&self) -> &Origin {
        self.origin
    }

    /// Host packages the engine was configured to export.
    #[must_use]
    pub fn host_exports(&self) -> &BTreeSet<String> {
        self.exports
    }

    #[must_use]
    pub fn is_exported(&self, package: &str) -> bool {
        self.exports.contains(package)
    }

    /// Publish a service under interface `T`.
    ///
    /// Registrations take effect only if `start` returns `Ok`.
    pub fn register<T: ?Sized + Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.published
            .push((ServiceInterface::of::<T>(), erase(service)));
    }
}

/// Entry point of a bundle.
pub trait Activator: Send + Sync {
    fn start(&self, ctx: &mut ActivatorContext<'_>) -> Result<(), ActivatorError>;

    fn stop(&self, _ctx: &ActivatorContext<'_>) -> Result<(), ActivatorError> {
        Ok(())
    }
}

/// Activator built from a start closure. See [`activator_fn`].
pub struct FnActivator<F>(F);

/// Wrap a closure as an [`Activator`] with a no-op `stop`.
pub fn activator_fn<F>(start: F) -> FnActivator<F>
where
    F: Fn(&mut ActivatorContext<'_>) -> Result<(), ActivatorError> + Send + Sync,
{
    FnActivator(start)
}

impl<F> Activator for FnActivator<F>
where
    F: Fn(&mut ActivatorContext<'_>) -> Result<(), ActivatorError> + Send + Sync,
{
    fn start(&self, ctx: &mut ActivatorContext<'_>) -> Result<(), ActivatorError> {
        (self.0)(ctx)
    }
}

// =============================================================================
// ENGINE STATE
// =============================================================================

/// Use counters of one service registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceUsage {
    /// Acquisitions not yet released.
    pub use_count: usize,
    /// Successful acquires since publication.
    pub acquisitions: usize,
    /// Releases that had an effect since publication.
    pub releases: usize,
}

struct InstalledBundle {
    handle: Arc<MemoryHandle>,
    activator: String,
    started: bool,
    last_modified: DateTime<Utc>,
}

struct Registration {
    interface: ServiceInterface,
    publisher: Origin,
    object: ServiceObject,
    usage: ServiceUsage,
}

#[derive(Default)]
struct EngineState {
    attached: bool,
    bundles: BTreeMap<Origin, InstalledBundle>,
    services: BTreeMap<ServiceId, Registration>,
    next_service: u64,
}

impl EngineState {
    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.attached {
            Ok(())
        } else {
            Err(EngineError::NotRunning)
        }
    }

    /// The installation `handle` belongs to. A stale handle from an earlier
    /// installation of the same origin does not match.
    fn bundle(&self, handle: &MemoryHandle) -> Result<&InstalledBundle, EngineError> {
        self.bundles
            .get(&handle.origin)
            .filter(|b| std::ptr::eq(Arc::as_ptr(&b.handle), handle))
            .ok_or_else(|| EngineError::NotInstalled(handle.origin.clone()))
    }

    fn bundle_mut(&mut self, handle: &MemoryHandle) -> Result<&mut InstalledBundle, EngineError> {
        self.bundles
            .get_mut(&handle.origin)
            .filter(|b| std::ptr::eq(Arc::as_ptr(&b.handle), handle))
            .ok_or_else(|| EngineError::NotInstalled(handle.origin.clone()))
    }

    fn publish(&mut self, publisher: &Origin, interface: ServiceInterface, object: ServiceObject) {
        self.next_service += 1;
        let id = ServiceId(self.next_service);
        self.services.insert(
            id,
            Registration {
                interface,
                publisher: publisher.clone(),
                object,
                usage: ServiceUsage::default(),
            },
        );
    }

    fn withdraw(&mut self, publisher: &Origin) -> usize {
        let before = self.services.len();
        self.services.retain(|_, r| &r.publisher != publisher);
        before - self.services.len()
    }
}

struct EngineInner {
    config: EngineConfig,
    reader: Arc<dyn PackageReader>,
    activators: RwLock<BTreeMap<String, Arc<dyn Activator>>>,
    state: Mutex<EngineState>,
}

impl EngineInner {
    fn activator(&self, name: &str) -> Result<Arc<dyn Activator>, EngineError> {
        self.activators
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::ActivatorNotFound(name.to_string()))
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// In-process engine backed by host-registered activators.
pub struct InMemoryEngine {
    inner: Arc<EngineInner>,
}

impl InMemoryEngine {
    /// Create an engine with the default configuration.
    #[must_use]
    pub fn new(reader: Arc<dyn PackageReader>) -> Self {
        Self::with_config(EngineConfig::default(), reader)
    }

    #[must_use]
    pub fn with_config(config: EngineConfig, reader: Arc<dyn PackageReader>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                reader,
                activators: RwLock::new(BTreeMap::new()),
                state: Mutex::new(EngineState::default()),
            }),
        }
    }

    /// Make bundle code available under the name packages refer to in
    /// `Bundle-Activator`. Replaces any activator of the same name.
    pub fn register_activator(&self, name: impl Into<String>, activator: impl Activator + 'static) {
        self.register_shared_activator(name, Arc::new(activator));
    }

    pub fn register_shared_activator(&self, name: impl Into<String>, activator: Arc<dyn Activator>) {
        self.inner.activators.write().insert(name.into(), activator);
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.state.lock().attached
    }

    /// Number of bundles currently installed.
    #[must_use]
    pub fn installed_count(&self) -> usize {
        self.inner.state.lock().bundles.len()
    }

    /// Counters of a live registration, `None` once it was withdrawn.
    #[must_use]
    pub fn usage(&self, service: ServiceId) -> Option<ServiceUsage> {
        self.inner
            .state
            .lock()
            .services
            .get(&service)
            .map(|r| r.usage)
    }

    /// Outstanding acquisitions of a live registration.
    #[must_use]
    pub fn use_count(&self, service: ServiceId) -> Option<usize> {
        self.usage(service).map(|u| u.use_count)
    }
}

impl Engine for InMemoryEngine {
    fn attach(&self) -> Result<(), EngineError> {
        let mut state = self.inner.state.lock();
        if state.attached {
            return Err(EngineError::AlreadyAttached);
        }
        if self.inner.config.clean_storage_on_init {
            state.bundles.clear();
            state.services.clear();
        }
        state.attached = true;
        tracing::debug!(
            exports = self.inner.config.extra_exports.len(),
            retained = state.bundles.len(),
            "in-memory engine attached"
        );
        Ok(())
    }

    fn install(&self, origin: &Origin) -> Result<Arc<dyn EngineHandle>, EngineError> {
        {
            let state = self.inner.state.lock();
            state.ensure_running()?;
            if let Some(bundle) = state.bundles.get(origin) {
                let handle: Arc<dyn EngineHandle> = bundle.handle.clone();
                return Ok(handle);
            }
        }

        // Read outside the state lock; the reader may hit the filesystem.
        let descriptor = BundleDescriptor::from_contents(self.inner.reader.read(origin)?)?;

        let mut state = self.inner.state.lock();
        state.ensure_running()?;
        let bundle = state
            .bundles
            .entry(origin.clone())
            .or_insert_with(|| InstalledBundle {
                handle: Arc::new(MemoryHandle {
                    origin: origin.clone(),
                    engine: Arc::downgrade(&self.inner),
                }),
                activator: descriptor.activator().to_string(),
                started: false,
                last_modified: Utc::now(),
            });
        tracing::debug!(%origin, activator = %bundle.activator, "bundle installed");
        let handle: Arc<dyn EngineHandle> = bundle.handle.clone();
        Ok(handle)
    }

    fn active_service_references(
        &self,
        interface: ServiceInterface,
    ) -> Result<Vec<Arc<dyn ServiceReference>>, EngineError> {
        let state = self.inner.state.lock();
        state.ensure_running()?;
        Ok(state
            .services
            .iter()
            .filter(|(_, r)| r.interface == interface)
            .map(|(id, r)| {
                let reference: Arc<dyn ServiceReference> = Arc::new(MemoryServiceReference {
                    id: *id,
                    interface: r.interface,
                    publisher: r.publisher.clone(),
                    engine: Arc::downgrade(&self.inner),
                });
                reference
            })
            .collect())
    }

    fn shutdown(&self) -> Result<(), EngineError> {
        let started: Vec<Arc<MemoryHandle>> = {
            let state = self.inner.state.lock();
            if !state.attached {
                return Ok(());
            }
            state
                .bundles
                .values()
                .filter(|b| b.started)
                .map(|b| b.handle.clone())
                .collect()
        };

        let mut first_error = None;
        for handle in started.iter().rev() {
            if let Err(e) = handle.stop() {
                first_error.get_or_insert(e);
            }
        }

        let mut state = self.inner.state.lock();
        state.services.clear();
        state.attached = false;
        tracing::debug!(installed = state.bundles.len(), "in-memory engine shut down");
        first_error.map_or(Ok(()), Err)
    }
}

// =============================================================================
// HANDLES
// =============================================================================

struct MemoryHandle {
    origin: Origin,
    engine: Weak<EngineInner>,
}

impl MemoryHandle {
    fn engine(&self) -> Result<Arc<EngineInner>, EngineError> {
        self.engine.upgrade().ok_or(EngineError::NotRunning)
    }
}

impl EngineHandle for MemoryHandle {
    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn start(&self) -> Result<(), EngineError> {
        let engine = self.engine()?;
        let activator_name = {
            let state = engine.state.lock();
            state.ensure_running()?;
            let bundle = state.bundle(self)?;
            if bundle.started {
                return Ok(());
            }
            bundle.activator.clone()
        };

        let activator = engine.activator(&activator_name)?;
        let mut ctx = ActivatorContext::new(&self.origin, &engine.config.extra_exports);
        activator
            .start(&mut ctx)
            .map_err(|e| EngineError::Activator {
                activator: activator_name.clone(),
                reason: e.to_string(),
            })?;

        let mut state = engine.state.lock();
        state.bundle(self)?;
        let count = ctx.published.len();
        for (interface, object) in ctx.published {
            state.publish(&self.origin, interface, object);
        }
        let bundle = state.bundle_mut(self)?;
        bundle.started = true;
        bundle.last_modified = Utc::now();
        tracing::debug!(origin = %self.origin, services = count, "bundle started");
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        let engine = self.engine()?;
        let activator_name = {
            let mut state = engine.state.lock();
            state.ensure_running()?;
            let bundle = state.bundle_mut(self)?;
            if !bundle.started {
                return Ok(());
            }
            bundle.started = false;
            bundle.last_modified = Utc::now();
            let name = bundle.activator.clone();
            let withdrawn = state.withdraw(&self.origin);
            tracing::debug!(origin = %self.origin, withdrawn, "bundle stopped");
            name
        };

        // The bundle is stopped even if its activator complains.
        let activator = engine.activator(&activator_name)?;
        let ctx = ActivatorContext::new(&self.origin, &engine.config.extra_exports);
        activator.stop(&ctx).map_err(|e| EngineError::Activator {
            activator: activator_name,
            reason: e.to_string(),
        })
    }

    fn uninstall(&self) -> Result<(), EngineError> {
        let stopped = self.stop();
        let engine = self.engine()?;
        let mut state = engine.state.lock();
        state.ensure_running()?;
        state.bundle(self)?;
        state.bundles.remove(&self.origin);
        tracing::debug!(origin = %self.origin, "bundle uninstalled");
        stopped
    }

    fn last_modified(&self) -> Result<DateTime<Utc>, EngineError> {
        let engine = self.engine()?;
        let state = engine.state.lock();
        Ok(state.bundle(self)?.last_modified)
    }
}

struct MemoryServiceReference {
    id: ServiceId,
    interface: ServiceInterface,
    publisher: Origin,
    engine: Weak<EngineInner>,
}

impl ServiceReference for MemoryServiceReference {
    fn service_id(&self) -> ServiceId {
        self.id
    }

    fn interface(&self) -> ServiceInterface {
        self.interface
    }

    fn publisher(&self) -> &Origin {
        &self.publisher
    }

    fn acquire(&self) -> Option<ServiceObject> {
        let engine = self.engine.upgrade()?;
        let mut state = engine.state.lock();
        let registration = state.services.get_mut(&self.id)?;
        registration.usage.use_count += 1;
        registration.usage.acquisitions += 1;
        Some(registration.object.clone())
    }

    fn release(&self) -> bool {
        let Some(engine) = self.engine.upgrade() else {
            return false;
        };
        let mut state = engine.state.lock();
        match state.services.get_mut(&self.id) {
            Some(registration) if registration.usage.use_count > 0 => {
                registration.usage.use_count -= 1;
                registration.usage.releases += 1;
                true
            }
            _ => false,
        }
    }
}

// =============================================================================
// FACTORY
// =============================================================================

/// Builds [`InMemoryEngine`]s preloaded with activators.
pub struct MemoryEngineFactory {
    reader: Arc<dyn PackageReader>,
    activators: BTreeMap<String, Arc<dyn Activator>>,
}

impl MemoryEngineFactory {
    #[must_use]
    pub fn new(reader: Arc<dyn PackageReader>) -> Self {
        Self {
            reader,
            activators: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_activator(
        mut self,
        name: impl Into<String>,
        activator: impl Activator + 'static,
    ) -> Self {
        self.activators.insert(name.into(), Arc::new(activator));
        self
    }
}

impl EngineFactory for MemoryEngineFactory {
    fn new_engine(&self, config: &EngineConfig) -> Result<Arc<dyn Engine>, EngineError> {
        let engine = InMemoryEngine::with_config(config.clone(), self.reader.clone());
        for (name, activator) in &self.activators {
            engine.register_shared_activator(name.clone(), activator.clone());
        }
        Ok(Arc::new(engine))
    }
}

// =============================================================================
// TESTS
// =============================================================================
