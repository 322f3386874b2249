//! # Service Module
//!
//! Scoped, revocable access to services published by started bundles.
//!
//! A [`ServiceProxy`] names one service registration. It does not hold the
//! service object: every use acquires it from the engine and releases it
//! again, so the engine's use count stays exact.
//!
//! [`ServiceProxy::with_service`] is the safe path. The closure receives a
//! [`ServiceView`] that is revoked the moment the closure returns, fails or
//! unwinds; a view smuggled out of the closure answers [`BundleError::Locked`].

use crate::engine::{ServiceInterface, ServiceReference, downcast};
use crate::registry::RegistryShared;
use crate::{BundleError, Origin, ServiceId};
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

// =============================================================================
// SERVICE VIEW
// =============================================================================

/// Guarded handle on a service object, valid for one `with_service` scope.
pub struct ServiceView<T: ?Sized> {
    slot: Arc<RwLock<Option<Arc<T>>>>,
}

impl<T: ?Sized> ServiceView<T> {
    fn new(service: Arc<T>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Some(service))),
        }
    }

    /// Call into the service. Fails with `Locked` once the scope has ended.
    pub fn call<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, BundleError> {
        match self.slot.read().as_deref() {
            Some(service) => Ok(f(service)),
            None => Err(BundleError::Locked),
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.slot.read().is_none()
    }

    /// Waits for calls in progress on other clones, then locks every clone.
    fn revoke(&self) {
        self.slot.write().take();
    }
}

impl<T: ?Sized> Clone for ServiceView<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for ServiceView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceView")
            .field("locked", &self.is_locked())
            .finish()
    }
}

// =============================================================================
// SERVICE PROXY
// =============================================================================

/// Handle on one service registration of interface `T`.
pub struct ServiceProxy<T: ?Sized> {
    reference: Arc<dyn ServiceReference>,
    registry: Weak<RegistryShared>,
    _interface: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> ServiceProxy<T> {
    pub(crate) fn new(reference: Arc<dyn ServiceReference>, registry: Weak<RegistryShared>) -> Self {
        Self {
            reference,
            registry,
            _interface: PhantomData,
        }
    }

    #[must_use]
    pub fn service_id(&self) -> ServiceId {
        self.reference.service_id()
    }

    #[must_use]
    pub fn interface(&self) -> ServiceInterface {
        self.reference.interface()
    }

    /// Origin of the bundle that published the service.
    #[must_use]
    pub fn publisher(&self) -> &Origin {
        self.reference.publisher()
    }

    /// Run `f` against the live service.
    ///
    /// The service is acquired before `f` runs and released after it, on
    /// every exit path including a panic. `f` runs with no registry lock
    /// held. Fails with `ServiceUnavailable` if the engine no longer has the
    /// service, e.g. because its bundle was stopped.
    pub fn with_service<R, E>(&self, f: impl FnOnce(&ServiceView<T>) -> Result<R, E>) -> Result<R, E>
    where
        E: From<BundleError>,
    {
        let scope = Scope {
            proxy: self,
            view: ServiceView::new(self.acquire()?),
        };
        f(&scope.view)
    }

    /// Acquire the service object directly.
    ///
    /// The caller owns one use of the service and must give it back with
    /// [`BundleRegistry::release`](crate::BundleRegistry::release). The
    /// object must not be kept past that point, nor past the bundle's stop.
    pub fn get_service(&self) -> Result<Arc<T>, BundleError> {
        self.acquire()
    }

    fn acquire(&self) -> Result<Arc<T>, BundleError> {
        self.registry
            .upgrade()
            .ok_or(BundleError::Closed)?
            .ensure_open()?;
        let unavailable = || BundleError::ServiceUnavailable {
            interface: self.reference.interface().name(),
            service: self.service_id(),
        };

        let object = self.reference.acquire().ok_or_else(unavailable)?;
        match downcast::<T>(&object) {
            Some(service) => {
                tracing::debug!(service = %self.service_id(), "service acquired");
                Ok(service)
            }
            None => {
                // Published under T's interface but not a T: give it back.
                self.reference.release();
                Err(unavailable())
            }
        }
    }

    /// Whether this proxy was handed out by the registry owning `shared`.
    pub(crate) fn belongs_to(&self, shared: &Arc<RegistryShared>) -> bool {
        std::ptr::eq(self.registry.as_ptr(), Arc::as_ptr(shared))
    }

    pub(crate) fn release(&self) -> bool {
        let released = self.reference.release();
        if released {
            tracing::debug!(service = %self.service_id(), "service released");
        } else {
            tracing::warn!(service = %self.service_id(), "service release had no effect");
        }
        released
    }
}

impl<T: ?Sized> Clone for ServiceProxy<T> {
    fn clone(&self) -> Self {
        Self {
            reference: self.reference.clone(),
            registry: self.registry.clone(),
            _interface: PhantomData,
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for ServiceProxy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("service", &self.reference.service_id())
            .field("interface", &self.reference.interface().name())
            .field("publisher", self.reference.publisher())
            .finish()
    }
}

/// Revokes the view and releases the acquisition when dropped.
struct Scope<'a, T: ?Sized + Send + Sync + 'static> {
    proxy: &'a ServiceProxy<T>,
    view: ServiceView<T>,
}

impl<T: ?Sized + Send + Sync + 'static> Drop for Scope<'_, T> {
    fn drop(&mut self) {
        self.view.revoke();
        self.proxy.release();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoked_view_is_locked_for_every_clone() {
        let view = ServiceView::new(Arc::new(41_u32));
        let copy = view.clone();
        assert_eq!(view.call(|n| n + 1).expect("live"), 42);
        assert!(!copy.is_locked());

        view.revoke();
        assert!(copy.is_locked());
        assert!(matches!(copy.call(|n| *n), Err(BundleError::Locked)));
    }

    #[test]
    fn views_over_unsized_services() {
        let view: ServiceView<str> = ServiceView::new(Arc::from("stagehand"));
        assert_eq!(view.call(str::len).expect("live"), 9);
    }
}
