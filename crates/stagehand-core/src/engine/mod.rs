//! # Engine Module
//!
//! The execution engine seen from the registry.
//!
//! The registry never runs bundle code itself. It drives an [`Engine`]
//! through these traits and treats every engine failure as opaque. A
//! working in-process engine lives in [`memory`].
//!
//! | Trait | Role |
//! |-------|------|
//! | [`EngineFactory`] | builds an engine from an [`EngineConfig`] |
//! | [`Engine`] | installs bundles, enumerates service references |
//! | [`EngineHandle`] | one installed bundle: start, stop, uninstall |
//! | [`ServiceReference`] | one service registration with a use count |

pub mod memory;

pub use memory::{
    Activator, ActivatorContext, ActivatorError, FnActivator, InMemoryEngine, MemoryEngineFactory,
    ServiceUsage, activator_fn,
};

use crate::config::EngineConfig;
use crate::package::PackageError;
use crate::{Origin, ServiceId};
use chrono::{DateTime, Utc};
use std::any::{Any, TypeId};
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

/// Failure reported by an engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine is not running")]
    NotRunning,

    #[error("engine is already attached to a registry")]
    AlreadyAttached,

    #[error("no bundle installed from {0}")]
    NotInstalled(Origin),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("activator `{0}` is not known to the engine")]
    ActivatorNotFound(String),

    #[error("activator `{activator}` failed: {reason}")]
    Activator { activator: String, reason: String },

    #[error("{0}")]
    Other(String),
}

// =============================================================================
// SERVICE TYPES
// =============================================================================

/// A published service object, type-erased.
///
/// Engines store an `Arc<T>` inside the `Any`, so trait-object services
/// (`Arc<dyn Trait>`) are supported as well as concrete ones.
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

/// Wrap a typed service into a [`ServiceObject`].
#[must_use]
pub fn erase<T: ?Sized + Send + Sync + 'static>(service: Arc<T>) -> ServiceObject {
    Arc::new(service)
}

/// Recover the typed service from a [`ServiceObject`].
#[must_use]
pub fn downcast<T: ?Sized + Send + Sync + 'static>(object: &ServiceObject) -> Option<Arc<T>> {
    object.downcast_ref::<Arc<T>>().cloned()
}

/// Capability type a service is published under.
#[derive(Debug, Clone, Copy)]
pub struct ServiceInterface {
    type_id: TypeId,
    name: &'static str,
}

impl ServiceInterface {
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Rust type name, for diagnostics only.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl PartialEq for ServiceInterface {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ServiceInterface {}

impl std::hash::Hash for ServiceInterface {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl PartialOrd for ServiceInterface {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceInterface {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.type_id.cmp(&other.type_id)
    }
}

impl std::fmt::Display for ServiceInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

// =============================================================================
// COLLABORATOR TRAITS
// =============================================================================

/// The execution engine.
///
/// An engine serves at most one registry. [`Engine::attach`] claims it and
/// must reject a second claim with [`EngineError::AlreadyAttached`] until
/// [`Engine::shutdown`] releases it.
pub trait Engine: Send + Sync {
    /// Claim the engine for a registry and start it.
    fn attach(&self) -> Result<(), EngineError>;

    /// Install the bundle behind `origin`.
    fn install(&self, origin: &Origin) -> Result<Arc<dyn EngineHandle>, EngineError>;

    /// Live registrations published under `interface`.
    fn active_service_references(
        &self,
        interface: ServiceInterface,
    ) -> Result<Vec<Arc<dyn ServiceReference>>, EngineError>;

    /// Stop the engine and release the attachment.
    fn shutdown(&self) -> Result<(), EngineError>;
}

/// One bundle installed in an engine.
pub trait EngineHandle: Send + Sync {
    fn origin(&self) -> &Origin;
    fn start(&self) -> Result<(), EngineError>;
    fn stop(&self) -> Result<(), EngineError>;
    fn uninstall(&self) -> Result<(), EngineError>;
    /// When the engine last changed this bundle's state.
    fn last_modified(&self) -> Result<DateTime<Utc>, EngineError>;
}

/// One service registration.
///
/// `acquire` and `release` follow the engine's use count: every successful
/// acquire must be paired with one release.
pub trait ServiceReference: Send + Sync {
    fn service_id(&self) -> ServiceId;
    fn interface(&self) -> ServiceInterface;
    /// Origin of the bundle that published the service.
    fn publisher(&self) -> &Origin;
    /// Get the live object and bump the use count. `None` once unregistered.
    fn acquire(&self) -> Option<ServiceObject>;
    /// Drop one use. Returns `false` when there was nothing to release.
    fn release(&self) -> bool;
}

/// Builds engines for [`BundleRegistry::launch`](crate::BundleRegistry::launch).
pub trait EngineFactory {
    fn new_engine(&self, config: &EngineConfig) -> Result<Arc<dyn Engine>, EngineError>;
}
