//! # Record Module
//!
//! Bundle records: one immutable snapshot of a bundle in one stage.
//!
//! A record never changes stage. A transition expires it and swaps a freshly
//! built replacement into its registry slot. Callers holding the expired
//! record keep a read-only husk: identity and timestamps stay readable, every
//! stage-dependent accessor fails with [`BundleError::Expired`].
//!
//! ## Capabilities
//!
//! | Stage | Payload | Adds |
//! |-------|---------|------|
//! | Registered | `StagePayload::Registered` | nothing |
//! | Installed | `StagePayload::Installed` | install time, engine handle |
//! | Started | `StagePayload::Started` | start time |
//!
//! Each payload carries everything of the one below it.

use crate::conflict::{self, BundleConflict};
use crate::engine::EngineHandle;
use crate::lifecycle::{Expiration, Stage, Transition};
use crate::package::BundleDescriptor;
use crate::registry::RegistryShared;
use crate::{BundleError, ContentChecksum, Origin, RecordId, Version};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

// =============================================================================
// PAYLOADS
// =============================================================================

/// Capabilities of an installed bundle, built once the engine confirmed the
/// install.
#[derive(Clone)]
pub(crate) struct InstalledPayload {
    installed_at: DateTime<Utc>,
    handle: Arc<dyn EngineHandle>,
}

impl InstalledPayload {
    pub(crate) fn new(handle: Arc<dyn EngineHandle>) -> Self {
        Self {
            installed_at: Utc::now(),
            handle,
        }
    }
}

#[derive(Clone)]
pub(crate) struct StartedPayload {
    installed: InstalledPayload,
    started_at: DateTime<Utc>,
}

/// Stage-specific capabilities of a live record.
#[derive(Clone)]
pub(crate) enum StagePayload {
    Registered,
    Installed(InstalledPayload),
    Started(StartedPayload),
}

impl StagePayload {
    pub(crate) fn stage(&self) -> Stage {
        match self {
            StagePayload::Registered => Stage::Registered,
            StagePayload::Installed(_) => Stage::Installed,
            StagePayload::Started(_) => Stage::Started,
        }
    }

    fn installed(&self) -> Option<&InstalledPayload> {
        match self {
            StagePayload::Registered => None,
            StagePayload::Installed(installed) => Some(installed),
            StagePayload::Started(started) => Some(&started.installed),
        }
    }

    /// Payload of the record a transition produces from this one.
    ///
    /// `installed` is the handle the engine returned for an install. `None`
    /// for unregister, and for any transition not legal from here.
    pub(crate) fn advance(
        &self,
        transition: Transition,
        installed: Option<Arc<dyn EngineHandle>>,
    ) -> Option<StagePayload> {
        match (transition, self) {
            (Transition::Install, StagePayload::Registered) => {
                installed.map(|handle| StagePayload::Installed(InstalledPayload::new(handle)))
            }
            (Transition::Start, StagePayload::Installed(installed)) => {
                Some(StagePayload::Started(StartedPayload {
                    installed: installed.clone(),
                    started_at: Utc::now(),
                }))
            }
            (Transition::Stop, StagePayload::Started(started)) => {
                Some(StagePayload::Installed(started.installed.clone()))
            }
            (Transition::Uninstall, StagePayload::Installed(_)) => Some(StagePayload::Registered),
            _ => None,
        }
    }

    /// The engine handle of an installed or started bundle.
    pub(crate) fn engine_handle(&self) -> Option<&Arc<dyn EngineHandle>> {
        self.installed().map(|installed| &installed.handle)
    }
}

enum RecordState {
    Live(StagePayload),
    Expired(Expiration),
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Fields carried unchanged from a record to its replacements.
pub(crate) struct BundleIdentity {
    origin: Origin,
    descriptor: BundleDescriptor,
    registered_at: DateTime<Utc>,
}

impl BundleIdentity {
    pub(crate) fn new(origin: Origin, descriptor: BundleDescriptor) -> Self {
        Self {
            origin,
            descriptor,
            registered_at: Utc::now(),
        }
    }
}

// =============================================================================
// BUNDLE RECORD
// =============================================================================

/// A bundle in one lifecycle stage.
///
/// Records are handed out as `Arc<BundleRecord>`. Two records are equal when
/// they have the same [`RecordId`].
pub struct BundleRecord {
    id: RecordId,
    identity: Arc<BundleIdentity>,
    state: Mutex<RecordState>,
    registry: Weak<RegistryShared>,
}

impl BundleRecord {
    pub(crate) fn new(
        id: RecordId,
        identity: Arc<BundleIdentity>,
        payload: StagePayload,
        registry: Weak<RegistryShared>,
    ) -> Self {
        Self {
            id,
            identity,
            state: Mutex::new(RecordState::Live(payload)),
            registry,
        }
    }

    /// Build the replacement a transition swaps in for this record.
    pub(crate) fn successor(&self, id: RecordId, payload: StagePayload) -> Self {
        Self::new(id, self.identity.clone(), payload, self.registry.clone())
    }

    // -------------------------------------------------------------------------
    // Identity (always available)
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn id(&self) -> RecordId {
        self.id
    }

    #[must_use]
    pub fn origin(&self) -> &Origin {
        &self.identity.origin
    }

    #[must_use]
    pub fn symbolic_name(&self) -> &str {
        self.identity.descriptor.symbolic_name()
    }

    #[must_use]
    pub fn version(&self) -> &Version {
        self.identity.descriptor.version()
    }

    /// `name:version`, the key reports use to name a bundle.
    #[must_use]
    pub fn symbolic_name_with_version(&self) -> String {
        format!("{}:{}", self.symbolic_name(), self.version())
    }

    /// When the bundle was first registered. Shared by all its records.
    #[must_use]
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.identity.registered_at
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(*self.state.lock(), RecordState::Expired(_))
    }

    #[must_use]
    pub fn expiration(&self) -> Option<Expiration> {
        match &*self.state.lock() {
            RecordState::Expired(expiration) => Some(*expiration),
            RecordState::Live(_) => None,
        }
    }

    // -------------------------------------------------------------------------
    // Stage-dependent accessors
    // -------------------------------------------------------------------------

    /// Current stage.
    pub fn stage(&self) -> Result<Stage, BundleError> {
        self.with_payload(|payload| Ok(payload.stage()))
    }

    /// Position in the registry's ordered collection.
    pub fn index(&self) -> Result<usize, BundleError> {
        self.ensure_live()?;
        self.registry()?
            .index_of(self)
            // replaced between the check and the lookup
            .map_err(|e| self.ensure_live().err().unwrap_or(e))
    }

    /// Entry point named by `Bundle-Activator`.
    pub fn activator(&self) -> Result<&str, BundleError> {
        self.ensure_live()?;
        Ok(self.identity.descriptor.activator())
    }

    /// Every descriptor attribute.
    pub fn attributes(&self) -> Result<&BTreeMap<String, String>, BundleError> {
        self.ensure_live()?;
        Ok(self.identity.descriptor.attributes())
    }

    pub fn class_entries(&self) -> Result<&BTreeMap<String, ContentChecksum>, BundleError> {
        self.ensure_live()?;
        Ok(self.identity.descriptor.class_entries())
    }

    pub fn is_registered_from(&self, origin: &Origin) -> Result<bool, BundleError> {
        self.ensure_live()?;
        Ok(self.origin() == origin)
    }

    /// When the bundle entered the installed stage. Kept across start/stop.
    pub fn installed_at(&self) -> Result<DateTime<Utc>, BundleError> {
        self.with_payload(|payload| {
            payload
                .installed()
                .map(|installed| installed.installed_at)
                .ok_or(BundleError::StageViolation {
                    expected: Stage::Installed,
                    actual: payload.stage(),
                })
        })
    }

    pub fn started_at(&self) -> Result<DateTime<Utc>, BundleError> {
        self.with_payload(|payload| match payload {
            StagePayload::Started(started) => Ok(started.started_at),
            other => Err(BundleError::StageViolation {
                expected: Stage::Started,
                actual: other.stage(),
            }),
        })
    }

    /// Last state change reported by the engine.
    pub fn last_modified(&self) -> Result<DateTime<Utc>, BundleError> {
        let handle = self.with_payload(|payload| {
            payload
                .engine_handle()
                .cloned()
                .ok_or(BundleError::StageViolation {
                    expected: Stage::Installed,
                    actual: payload.stage(),
                })
        })?;
        Ok(handle.last_modified()?)
    }

    /// Conflicts with every other live record of the registry.
    pub fn conflicts(&self) -> Result<BTreeSet<BundleConflict>, BundleError> {
        self.ensure_live()?;
        let registry = self.registry()?;
        let records = registry.read_records()?;
        // A transition may have expired this record while we waited.
        self.ensure_live()?;
        Ok(conflict::detect(self, &records))
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// `Registered -> Installed`.
    pub fn install(self: &Arc<Self>) -> Result<Arc<BundleRecord>, BundleError> {
        self.advance(Transition::Install)
    }

    /// `Installed -> Started`.
    pub fn start(self: &Arc<Self>) -> Result<Arc<BundleRecord>, BundleError> {
        self.advance(Transition::Start)
    }

    /// `Started -> Installed`.
    pub fn stop(self: &Arc<Self>) -> Result<Arc<BundleRecord>, BundleError> {
        self.advance(Transition::Stop)
    }

    /// `Installed -> Registered`.
    pub fn uninstall(self: &Arc<Self>) -> Result<Arc<BundleRecord>, BundleError> {
        self.advance(Transition::Uninstall)
    }

    /// `Registered -> Unregistered`. The record leaves the registry.
    pub fn unregister(self: &Arc<Self>) -> Result<(), BundleError> {
        self.ensure_live()
            .and_then(|()| self.registry())
            .and_then(|registry| registry.transition(self, Transition::Unregister))
            .map(|_| ())
            .map_err(|e| BundleError::during(Transition::Unregister, e))
    }

    fn advance(self: &Arc<Self>, transition: Transition) -> Result<Arc<BundleRecord>, BundleError> {
        self.ensure_live()
            .and_then(|()| self.registry())
            .and_then(|registry| registry.transition(self, transition))
            .and_then(|replacement| {
                replacement.ok_or(BundleError::StageViolation {
                    expected: transition.target(),
                    actual: Stage::Unregistered,
                })
            })
            .map_err(|e| BundleError::during(transition, e))
    }

    // -------------------------------------------------------------------------
    // Crate internals
    // -------------------------------------------------------------------------

    fn registry(&self) -> Result<Arc<RegistryShared>, BundleError> {
        self.registry.upgrade().ok_or(BundleError::Closed)
    }

    fn ensure_live(&self) -> Result<(), BundleError> {
        match &*self.state.lock() {
            RecordState::Expired(expiration) => Err(BundleError::Expired(*expiration)),
            RecordState::Live(_) => Ok(()),
        }
    }

    fn with_payload<R>(
        &self,
        f: impl FnOnce(&StagePayload) -> Result<R, BundleError>,
    ) -> Result<R, BundleError> {
        match &*self.state.lock() {
            RecordState::Expired(expiration) => Err(BundleError::Expired(*expiration)),
            RecordState::Live(payload) => f(payload),
        }
    }

    /// Fail unless the record is live and in `transition`'s source stage.
    pub(crate) fn check_source(&self, transition: Transition) -> Result<(), BundleError> {
        self.with_payload(|payload| {
            if payload.stage() == transition.source() {
                Ok(())
            } else {
                Err(BundleError::StageViolation {
                    expected: transition.source(),
                    actual: payload.stage(),
                })
            }
        })
    }

    /// Mark the record expired. Returns the payload it held.
    pub(crate) fn expire(&self, expiration: Expiration) -> Result<StagePayload, BundleError> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, RecordState::Expired(expiration)) {
            RecordState::Live(payload) => Ok(payload),
            RecordState::Expired(first) => {
                *state = RecordState::Expired(first);
                Err(BundleError::Expired(first))
            }
        }
    }

    pub(crate) fn descriptor(&self) -> &BundleDescriptor {
        &self.identity.descriptor
    }
}

impl PartialEq for BundleRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BundleRecord {}

impl std::hash::Hash for BundleRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Debug for BundleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("BundleRecord");
        out.field("id", &self.id)
            .field("origin", self.origin())
            .field("bundle", &self.symbolic_name_with_version());
        match &*self.state.lock() {
            RecordState::Live(payload) => out.field("stage", &payload.stage()),
            RecordState::Expired(expiration) => out.field("expired", expiration),
        };
        out.finish()
    }
}

impl std::fmt::Display for BundleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.symbolic_name_with_version(), self.id)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use crate::package::PackageContents;

    struct StubHandle(Origin);

    impl EngineHandle for StubHandle {
        fn origin(&self) -> &Origin {
            &self.0
        }
        fn start(&self) -> Result<(), EngineError> {
            Ok(())
        }
        fn stop(&self) -> Result<(), EngineError> {
            Ok(())
        }
        fn uninstall(&self) -> Result<(), EngineError> {
            Ok(())
        }
        fn last_modified(&self) -> Result<DateTime<Utc>, EngineError> {
            Ok(Utc::now())
        }
    }

    fn installed() -> StagePayload {
        StagePayload::Installed(InstalledPayload::new(Arc::new(StubHandle(Origin::new(
            "mem://rec",
        )))))
    }

    fn detached(payload: StagePayload) -> BundleRecord {
        let descriptor = BundleDescriptor::from_contents(
            PackageContents::new().with_descriptor("org.rec", "1.2.3", "org.rec.Main"),
        )
        .expect("valid");
        BundleRecord::new(
            RecordId(1),
            Arc::new(BundleIdentity::new(Origin::new("mem://rec"), descriptor)),
            payload,
            Weak::new(),
        )
    }

    #[test]
    fn identity_accessors() {
        let record = detached(StagePayload::Registered);
        assert_eq!(record.symbolic_name_with_version(), "org.rec:1.2.3");
        assert_eq!(record.stage().expect("live"), Stage::Registered);
        assert_eq!(record.activator().expect("live"), "org.rec.Main");
        assert!(record.is_registered_from(&Origin::new("mem://rec")).expect("live"));
        assert!(!record.is_expired());
        assert!(record.expiration().is_none());
    }

    #[test]
    fn stage_specific_accessors_check_stage() {
        let registered = detached(StagePayload::Registered);
        assert!(matches!(
            registered.installed_at(),
            Err(BundleError::StageViolation {
                expected: Stage::Installed,
                actual: Stage::Registered
            })
        ));

        let installed = detached(installed());
        assert!(installed.installed_at().is_ok());
        assert!(matches!(
            installed.started_at(),
            Err(BundleError::StageViolation {
                expected: Stage::Started,
                actual: Stage::Installed
            })
        ));
        assert!(installed.last_modified().is_ok());
        assert!(matches!(
            registered.last_modified(),
            Err(BundleError::StageViolation {
                expected: Stage::Installed,
                actual: Stage::Registered
            })
        ));
    }

    #[test]
    fn started_payload_keeps_install_time() {
        let installed = installed();
        let started = installed.advance(Transition::Start, None).expect("legal");
        let stopped = started.advance(Transition::Stop, None).expect("legal");
        let at = |p: &StagePayload| p.installed().map(|i| i.installed_at);
        assert_eq!(at(&installed), at(&started));
        assert_eq!(at(&installed), at(&stopped));
        assert!(started.engine_handle().is_some());
        assert!(installed.advance(Transition::Stop, None).is_none());
        assert!(StagePayload::Registered.advance(Transition::Unregister, None).is_none());
    }

    #[test]
    fn install_needs_the_engine_handle() {
        assert!(StagePayload::Registered.advance(Transition::Install, None).is_none());
        let handle: Arc<dyn EngineHandle> = Arc::new(StubHandle(Origin::new("mem://rec")));
        let installed = StagePayload::Registered
            .advance(Transition::Install, Some(handle))
            .expect("confirmed install");
        assert_eq!(installed.stage(), Stage::Installed);
        assert!(installed.engine_handle().is_some());
    }

    #[test]
    fn expired_record_is_a_husk() {
        let record = detached(StagePayload::Registered);
        let expiration = Expiration::now(Stage::Registered, Stage::Installed);
        record.expire(expiration).expect("first expiry");

        assert!(record.is_expired());
        assert_eq!(record.expiration(), Some(expiration));
        assert_eq!(record.symbolic_name(), "org.rec");
        assert!(matches!(record.stage(), Err(BundleError::Expired(_))));
        assert!(matches!(record.attributes(), Err(BundleError::Expired(_))));
        assert!(matches!(record.class_entries(), Err(BundleError::Expired(_))));

        // the first expiration is permanent
        let again = Expiration::now(Stage::Installed, Stage::Started);
        assert!(record.expire(again).is_err());
        assert_eq!(record.expiration(), Some(expiration));
    }

    #[test]
    fn detached_record_reports_closed_registry() {
        let record = Arc::new(detached(StagePayload::Registered));
        let err = record.install().expect_err("no registry");
        assert!(matches!(err.root_cause(), BundleError::Closed));
        assert_eq!(err.failed_transition(), Some(Transition::Install));
        assert!(matches!(record.index(), Err(BundleError::Closed)));
    }
}
