//! # Registry Module
//!
//! The ordered store of live bundle records.
//!
//! A registry:
//! - owns the record collection and the positional index of every record
//! - admits at most one live record per origin
//! - runs every transition as validate, commit, then call the engine, and
//!   builds the replacement record only once the engine succeeded
//! - is the only client of its engine (enforced through [`Engine::attach`])
//!
//! ## Locking
//!
//! One `RwLock` guards the collection. Registration, transitions and
//! shutdown take it exclusively and keep it across the engine call, so no
//! reader ever sees a half-swapped slot. Listing, index lookup and conflict
//! scans share it. Service closures run with no lock held.

use crate::config::EngineConfig;
use crate::conflict::BundleConflict;
use crate::engine::{Engine, EngineError, EngineFactory, EngineHandle, ServiceInterface};
use crate::lifecycle::{Expiration, Transition};
use crate::package::{BundleDescriptor, PackageReader};
use crate::record::{BundleIdentity, BundleRecord, StagePayload};
use crate::service::ServiceProxy;
use crate::{BundleError, Origin, RecordId};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

// =============================================================================
// SHARED STATE
// =============================================================================

/// State reachable from records and proxies through a `Weak` back-pointer.
pub(crate) struct RegistryShared {
    engine: Arc<dyn Engine>,
    reader: Arc<dyn PackageReader>,
    records: RwLock<Vec<Arc<BundleRecord>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl RegistryShared {
    pub(crate) fn ensure_open(&self) -> Result<(), BundleError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BundleError::Closed)
        } else {
            Ok(())
        }
    }

    fn allocate_id(&self) -> RecordId {
        RecordId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn read_records(
        &self,
    ) -> Result<RwLockReadGuard<'_, Vec<Arc<BundleRecord>>>, BundleError> {
        let records = self.records.read();
        self.ensure_open()?;
        Ok(records)
    }

    pub(crate) fn index_of(&self, record: &BundleRecord) -> Result<usize, BundleError> {
        position(&self.read_records()?, record)
    }

    /// Run `transition` on `record` under the write lock.
    ///
    /// Returns the replacement, or `None` when the record left the registry.
    pub(crate) fn transition(
        &self,
        record: &Arc<BundleRecord>,
        transition: Transition,
    ) -> Result<Option<Arc<BundleRecord>>, BundleError> {
        let mut records = self.records.write();
        self.ensure_open()?;
        self.transition_locked(&mut records, record, transition)
    }

    fn transition_locked(
        &self,
        records: &mut Vec<Arc<BundleRecord>>,
        record: &Arc<BundleRecord>,
        transition: Transition,
    ) -> Result<Option<Arc<BundleRecord>>, BundleError> {
        // Validate: nothing is mutated before these pass.
        record.check_source(transition)?;
        let index = position(records, record)?;

        // Commit.
        let payload = record.expire(Expiration::now(transition.source(), transition.target()))?;
        tracing::debug!(
            bundle = %record.symbolic_name_with_version(),
            from = %record.id(),
            index,
            "{} committed",
            transition.verb()
        );

        // Call the engine. The replacement only exists once it succeeded.
        let installed = match self.call_engine(record, &payload, transition) {
            Ok(installed) => installed,
            Err(e) => {
                records.remove(index);
                tracing::warn!(
                    bundle = %record.symbolic_name_with_version(),
                    origin = %record.origin(),
                    "engine failed to {}: {}; bundle dropped from the registry",
                    transition.verb(),
                    e
                );
                if matches!(transition, Transition::Start | Transition::Stop) {
                    discard_installation(record, &payload);
                }
                return Err(e);
            }
        };

        let replacement = payload
            .advance(transition, installed)
            .map(|next| Arc::new(record.successor(self.allocate_id(), next)));
        match &replacement {
            Some(replacement) => records[index] = replacement.clone(),
            None => {
                records.remove(index);
                tracing::info!(
                    bundle = %record.symbolic_name_with_version(),
                    origin = %record.origin(),
                    "bundle unregistered"
                );
            }
        }
        Ok(replacement)
    }

    /// Run the engine side of `transition`. Returns the new handle for an
    /// install.
    fn call_engine(
        &self,
        record: &BundleRecord,
        previous: &StagePayload,
        transition: Transition,
    ) -> Result<Option<Arc<dyn EngineHandle>>, BundleError> {
        let origin = record.origin();
        let handle = || {
            previous
                .engine_handle()
                .ok_or_else(|| EngineError::NotInstalled(origin.clone()))
        };
        match transition {
            Transition::Install => return Ok(Some(self.engine.install(origin)?)),
            Transition::Start => handle()?.start()?,
            Transition::Stop => handle()?.stop()?,
            Transition::Uninstall => handle()?.uninstall()?,
            Transition::Unregister => {}
        }
        Ok(None)
    }

    fn load_services<T: ?Sized + Send + Sync + 'static>(
        self: &Arc<Self>,
    ) -> Result<Vec<ServiceProxy<T>>, BundleError> {
        let _records = self.read_records()?;
        let interface = ServiceInterface::of::<T>();
        let references = self
            .engine
            .active_service_references(interface)
            .map_err(|source| BundleError::LoadServicesFailed {
                interface: interface.name(),
                source,
            })?;
        tracing::debug!(interface = interface.name(), found = references.len(), "services loaded");
        Ok(references
            .into_iter()
            .map(|reference| ServiceProxy::new(reference, Arc::downgrade(self)))
            .collect())
    }

    /// Stop, uninstall and unregister every record, newest first, then shut
    /// the engine down. Every step is attempted; the first failure is kept.
    fn shutdown(&self) -> Result<(), BundleError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut records = self.records.write();
        let mut first_error = None;

        for transition in [Transition::Stop, Transition::Uninstall, Transition::Unregister] {
            let batch: Vec<Arc<BundleRecord>> = records
                .iter()
                .rev()
                .filter(|r| r.stage().is_ok_and(|s| s == transition.source()))
                .cloned()
                .collect();
            for record in batch {
                if let Err(e) = self.transition_locked(&mut records, &record, transition) {
                    first_error.get_or_insert(BundleError::during(transition, e));
                }
            }
        }

        if let Err(e) = self.engine.shutdown() {
            first_error.get_or_insert(BundleError::Engine(e));
        }
        tracing::info!(remaining = records.len(), "bundle registry shut down");
        first_error.map_or(Ok(()), Err)
    }
}

/// Slot of `record` in `records`, matched by identity.
fn position(records: &[Arc<BundleRecord>], record: &BundleRecord) -> Result<usize, BundleError> {
    records
        .iter()
        .position(|r| std::ptr::eq(Arc::as_ptr(r), record))
        .ok_or(BundleError::UnknownRecord(record.id()))
}

/// Remove a bundle from the engine after a failed start or stop left it
/// installed with no record pointing at it.
fn discard_installation(record: &BundleRecord, payload: &StagePayload) {
    let Some(handle) = payload.engine_handle() else {
        return;
    };
    match handle.uninstall() {
        Ok(()) => tracing::debug!(origin = %record.origin(), "orphaned installation removed"),
        Err(e) => tracing::warn!(
            origin = %record.origin(),
            "failed to remove orphaned installation: {}",
            e
        ),
    }
}

// =============================================================================
// BUNDLE REGISTRY
// =============================================================================

/// Lifecycle registry bound to one engine.
///
/// Dropping the registry shuts it down.
pub struct BundleRegistry {
    shared: Arc<RegistryShared>,
}

impl BundleRegistry {
    /// Bind a registry to `engine`.
    ///
    /// Fails with [`EngineError::AlreadyAttached`](crate::engine::EngineError::AlreadyAttached)
    /// if another registry already holds the engine.
    pub fn new(engine: Arc<dyn Engine>, reader: Arc<dyn PackageReader>) -> Result<Self, BundleError> {
        engine.attach()?;
        tracing::info!("bundle registry attached to engine");
        Ok(Self {
            shared: Arc::new(RegistryShared {
                engine,
                reader,
                records: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Build an engine through `factory` and bind a registry to it.
    pub fn launch(
        factory: &dyn EngineFactory,
        config: &EngineConfig,
        reader: Arc<dyn PackageReader>,
    ) -> Result<Self, BundleError> {
        let engine = factory.new_engine(config)?;
        Self::new(engine, reader)
    }

    /// Register the bundle behind `origin` in the `Registered` stage.
    ///
    /// The package is read and validated before the registry is locked.
    pub fn register(&self, origin: impl Into<Origin>) -> Result<Arc<BundleRecord>, BundleError> {
        let origin = origin.into();
        self.shared.ensure_open()?;
        let descriptor = BundleDescriptor::from_contents(self.shared.reader.read(&origin)?)?;

        let mut records = self.shared.records.write();
        self.shared.ensure_open()?;
        if let Some(existing) = records.iter().find(|r| r.origin() == &origin) {
            return Err(BundleError::AlreadyRegistered {
                origin,
                existing: existing.clone(),
            });
        }

        let record = Arc::new(BundleRecord::new(
            self.shared.allocate_id(),
            Arc::new(BundleIdentity::new(origin, descriptor)),
            StagePayload::Registered,
            Arc::downgrade(&self.shared),
        ));
        records.push(record.clone());
        tracing::info!(
            bundle = %record.symbolic_name_with_version(),
            origin = %record.origin(),
            index = records.len() - 1,
            "bundle registered"
        );
        Ok(record)
    }

    /// Live view of the non-expired records in positional order.
    #[must_use]
    pub fn list_active(&self) -> ActiveBundles {
        ActiveBundles {
            shared: self.shared.clone(),
        }
    }

    /// The live record registered from `origin`, if any.
    #[must_use]
    pub fn find(&self, origin: &Origin) -> Option<Arc<BundleRecord>> {
        self.shared
            .read_records()
            .ok()?
            .iter()
            .find(|r| r.origin() == origin)
            .cloned()
    }

    /// Position of `record`, or `UnknownRecord` if it is not in the registry.
    pub fn index_of(&self, record: &BundleRecord) -> Result<usize, BundleError> {
        self.shared.index_of(record)
    }

    /// Conflicts of every live record, in positional order.
    pub fn conflict_report(
        &self,
    ) -> Result<Vec<(Arc<BundleRecord>, BTreeSet<BundleConflict>)>, BundleError> {
        let records = self.shared.read_records()?;
        Ok(records
            .iter()
            .map(|record| {
                let conflicts = crate::conflict::detect(record, &records);
                (record.clone(), conflicts)
            })
            .collect())
    }

    /// One proxy per live service registered under `T`.
    pub fn load_services<T: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<Vec<ServiceProxy<T>>, BundleError> {
        self.shared.load_services::<T>()
    }

    /// Give back one use of the service behind `proxy`.
    ///
    /// Returns whether the engine had anything to release. Releasing more
    /// often than acquiring is harmless. A proxy loaded from another registry
    /// is left alone.
    pub fn release<T: ?Sized + Send + Sync + 'static>(&self, proxy: &ServiceProxy<T>) -> bool {
        if !proxy.belongs_to(&self.shared) {
            tracing::warn!(service = %proxy.service_id(), "release of a proxy from another registry ignored");
            return false;
        }
        proxy.release()
    }

    /// Tear everything down. Later calls succeed without doing anything.
    pub fn shutdown(&self) -> Result<(), BundleError> {
        self.shared.shutdown()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for BundleRegistry {
    fn drop(&mut self) {
        if let Err(e) = self.shared.shutdown() {
            tracing::warn!("registry shutdown on drop failed: {}", e);
        }
    }
}

impl std::fmt::Debug for BundleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleRegistry")
            .field("records", &self.shared.records.read().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// ACTIVE VIEW
// =============================================================================

/// Read-through view of a registry's live records.
///
/// Every call reads the registry as it is at that moment, so the view never
/// goes stale. A closed registry reads as empty.
#[derive(Clone)]
pub struct ActiveBundles {
    shared: Arc<RegistryShared>,
}

impl ActiveBundles {
    fn with<R>(&self, f: impl FnOnce(&[Arc<BundleRecord>]) -> R) -> R {
        match self.shared.read_records() {
            Ok(records) => f(records.as_slice()),
            Err(_) => f(&[]),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.with(|records| records.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Arc<BundleRecord>> {
        self.with(|records| records.get(index).cloned())
    }

    #[must_use]
    pub fn contains(&self, record: &BundleRecord) -> bool {
        self.with(|records| position(records, record).is_ok())
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Arc<BundleRecord>> {
        self.with(|records| records.to_vec())
    }

    /// Iterate over the contents as of this call.
    pub fn iter(&self) -> std::vec::IntoIter<Arc<BundleRecord>> {
        self.to_vec().into_iter()
    }
}

impl IntoIterator for &ActiveBundles {
    type Item = Arc<BundleRecord>;
    type IntoIter = std::vec::IntoIter<Arc<BundleRecord>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl std::fmt::Debug for ActiveBundles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryEngine;
    use crate::lifecycle::Stage;
    use crate::package::{InMemoryPackageReader, PackageContents, PackageError};

    fn registry() -> (BundleRegistry, Arc<InMemoryPackageReader>) {
        let reader = Arc::new(InMemoryPackageReader::new());
        for (origin, name) in [("mem://a", "org.a"), ("mem://b", "org.b")] {
            reader.insert(
                origin,
                PackageContents::new().with_descriptor(name, "1.0.0", "noop"),
            );
        }
        let engine = Arc::new(InMemoryEngine::new(reader.clone()));
        engine.register_activator("noop", crate::engine::activator_fn(|_| Ok(())));
        (BundleRegistry::new(engine, reader.clone()).expect("attach"), reader)
    }

    #[test]
    fn register_appends_in_order() {
        let (registry, _) = registry();
        let a = registry.register("mem://a").expect("a");
        let b = registry.register("mem://b").expect("b");
        assert_eq!(a.index().expect("live"), 0);
        assert_eq!(b.index().expect("live"), 1);
        assert_eq!(registry.list_active().len(), 2);
        assert!(a.id() < b.id());
    }

    #[test]
    fn invalid_package_is_rejected_before_locking() {
        let (registry, _) = registry();
        let err = registry.register("mem://missing").expect_err("unreadable");
        assert!(matches!(
            err,
            BundleError::Validation(PackageError::Unreadable { .. })
        ));
        assert!(registry.list_active().is_empty());
    }

    #[test]
    fn view_is_live() {
        let (registry, _) = registry();
        let view = registry.list_active();
        assert!(view.is_empty());
        let a = registry.register("mem://a").expect("a");
        assert_eq!(view.len(), 1);
        assert!(view.contains(&a));
        a.unregister().expect("unregister");
        assert!(view.is_empty());
    }

    #[test]
    fn unknown_record_for_foreign_registry() {
        let (first, _) = registry();
        let (second, _) = registry();
        let a = first.register("mem://a").expect("a");
        assert!(matches!(
            second.index_of(&a),
            Err(BundleError::UnknownRecord(id)) if id == a.id()
        ));
    }

    #[test]
    fn second_registry_on_same_engine_is_rejected() {
        let reader = Arc::new(InMemoryPackageReader::new());
        let engine = Arc::new(InMemoryEngine::new(reader.clone()));
        let _first = BundleRegistry::new(engine.clone(), reader.clone()).expect("attach");
        let err = BundleRegistry::new(engine, reader).expect_err("singleton");
        assert!(matches!(
            err,
            BundleError::Engine(EngineError::AlreadyAttached)
        ));
    }

    #[test]
    fn launch_builds_engine_from_factory() {
        let reader = Arc::new(InMemoryPackageReader::new());
        reader.insert(
            "mem://a",
            PackageContents::new().with_descriptor("org.a", "1.0.0", "noop"),
        );
        let factory = crate::engine::MemoryEngineFactory::new(reader.clone())
            .with_activator("noop", crate::engine::activator_fn(|_| Ok(())));
        let config = EngineConfig::default().with_exports(["org.slf4j"]);

        let registry = BundleRegistry::launch(&factory, &config, reader).expect("launch");
        let started = registry
            .register("mem://a")
            .expect("a")
            .install()
            .expect("install")
            .start()
            .expect("start");
        assert_eq!(started.stage().expect("live"), Stage::Started);
    }

    #[test]
    fn shutdown_closes_everything() {
        let (registry, _) = registry();
        let a = registry.register("mem://a").expect("a");
        let a = a.install().expect("install").start().expect("start");
        registry.register("mem://b").expect("b");

        registry.shutdown().expect("clean shutdown");
        assert!(registry.is_closed());
        assert!(a.is_expired());
        assert!(registry.list_active().is_empty());
        assert!(matches!(
            registry.register("mem://a"),
            Err(BundleError::Closed)
        ));
        assert!(matches!(
            registry.load_services::<String>(),
            Err(BundleError::Closed)
        ));
        // idempotent
        registry.shutdown().expect("second shutdown");
    }
}
