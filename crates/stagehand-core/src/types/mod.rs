//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the registry:
//! - Identifiers (`Origin`, `RecordId`, `ServiceId`)
//! - Class entry checksums (`ContentChecksum`)
//! - Bundle versions (`Version`)
//! - The error taxonomy (`BundleError`)

mod version;

pub use version::{Version, VersionFormatError};

use crate::engine::EngineError;
use crate::lifecycle::{Expiration, Stage, Transition};
use crate::package::PackageError;
use crate::record::BundleRecord;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Where a bundle was registered from: a path or URI, opaque to the registry.
///
/// Two registrations collide when their origins compare equal, so callers
/// registering files should go through [`Origin::from_path`] to get an
/// absolute form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Origin(String);

impl Origin {
    /// Create an origin from any string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Create an origin from a filesystem path, made absolute against the
    /// current directory. The path does not have to exist.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let absolute = std::path::absolute(path.as_ref())?;
        Ok(Self(absolute.to_string_lossy().into_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The origin interpreted as a filesystem path.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl From<&str> for Origin {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Origin {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one record instance.
///
/// Every transition produces a record with a fresh id, so ids distinguish the
/// expired husk from its replacement even though both share an origin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RecordId(pub u64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Engine-assigned identifier of one service registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub u64);

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "service#{}", self.0)
    }
}

// =============================================================================
// CONTENT CHECKSUM
// =============================================================================

/// Digest of one class entry's bytes.
///
/// Two entries with equal checksums are treated as the same definition and
/// never reported as a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentChecksum([u8; 32]);

impl ContentChecksum {
    /// Compute the BLAKE3 digest of `content`.
    #[must_use]
    pub fn of(content: &[u8]) -> Self {
        Self(*blake3::hash(content).as_bytes())
    }

    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }
}

impl std::fmt::Display for ContentChecksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by the registry, its records and service proxies.
///
/// Precondition failures (validation, stage, expiry) are always raised
/// before anything is mutated. `Engine` failures surfacing from a transition
/// happen after the commit: the source record is already expired and the
/// bundle is gone from the registry.
#[derive(Debug, Error)]
pub enum BundleError {
    /// The package could not be read or its descriptor is malformed.
    #[error("bundle package is invalid: {0}")]
    Validation(#[from] PackageError),

    /// The origin already maps to a live record.
    #[error("a bundle is already registered from {origin}")]
    AlreadyRegistered {
        origin: Origin,
        existing: Arc<BundleRecord>,
    },

    /// The record is not in the stage the operation requires.
    #[error("bundle is {actual}, but the operation requires {expected}")]
    StageViolation { expected: Stage, actual: Stage },

    /// The record was replaced or removed by an earlier transition.
    #[error("bundle record expired: {0}")]
    Expired(Expiration),

    /// Registry consistency violation: the record is not where it should be.
    #[error("record {0} is not present in this registry")]
    UnknownRecord(crate::RecordId),

    /// The engine has no live object behind the reference.
    #[error("no live `{interface}` service behind {service}")]
    ServiceUnavailable {
        interface: &'static str,
        service: ServiceId,
    },

    /// A guarded service view was used after its scope ended.
    #[error("service view is locked; it was revoked when its scope ended")]
    Locked,

    /// Opaque failure surfaced from the engine.
    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),

    /// Enumerating service references failed.
    #[error("loading `{interface}` services failed: {source}")]
    LoadServicesFailed {
        interface: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("installation failed: {0}")]
    InstallationFailed(#[source] Box<BundleError>),

    #[error("start failed: {0}")]
    StartFailed(#[source] Box<BundleError>),

    #[error("stop failed: {0}")]
    StopFailed(#[source] Box<BundleError>),

    #[error("uninstallation failed: {0}")]
    UninstallationFailed(#[source] Box<BundleError>),

    #[error("unregistration failed: {0}")]
    UnregistrationFailed(#[source] Box<BundleError>),

    /// The registry was shut down.
    #[error("bundle registry is closed")]
    Closed,
}

impl BundleError {
    /// Wrap a failure into the error kind of the transition it interrupted.
    #[must_use]
    pub fn during(transition: Transition, cause: BundleError) -> Self {
        let cause = Box::new(cause);
        match transition {
            Transition::Install => Self::InstallationFailed(cause),
            Transition::Start => Self::StartFailed(cause),
            Transition::Stop => Self::StopFailed(cause),
            Transition::Uninstall => Self::UninstallationFailed(cause),
            Transition::Unregister => Self::UnregistrationFailed(cause),
        }
    }

    /// The transition this error was raised from, if any.
    #[must_use]
    pub fn failed_transition(&self) -> Option<Transition> {
        match self {
            Self::InstallationFailed(_) => Some(Transition::Install),
            Self::StartFailed(_) => Some(Transition::Start),
            Self::StopFailed(_) => Some(Transition::Stop),
            Self::UninstallationFailed(_) => Some(Transition::Uninstall),
            Self::UnregistrationFailed(_) => Some(Transition::Unregister),
            _ => None,
        }
    }

    /// The innermost error, with transition wrappers stripped.
    #[must_use]
    pub fn root_cause(&self) -> &BundleError {
        match self {
            Self::InstallationFailed(inner)
            | Self::StartFailed(inner)
            | Self::StopFailed(inner)
            | Self::UninstallationFailed(inner)
            | Self::UnregistrationFailed(inner) => inner.root_cause(),
            other => other,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
