//! # stagehand-core
//!
//! Lifecycle registry for dynamically loadable bundles - THE LOGIC.
//!
//! This crate tracks bundles through their lifecycle stages, detects bundles
//! that would collide before they go live, and hands out reference-counted,
//! revocable access to the services started bundles publish.
//!
//! ## Architecture
//!
//! - `lifecycle` → stage enum, transitions, expiration markers
//! - `record` → immutable per-stage bundle records
//! - `registry` → ordered record store driving every transition
//! - `conflict` → symbolic name and class entry collisions
//! - `service` → scoped service access with a drop guard
//! - `engine` / `package` → the collaborators the registry drives
//!
//! ## Architectural Constraints
//!
//! - Records never change stage in place: transitions expire and replace
//! - One registry per engine, claimed at construction
//! - Every call is synchronous; engine calls are never cancelled
//! - Has NO async, NO network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod conflict;
pub mod engine;
pub mod lifecycle;
pub mod package;
pub mod record;
pub mod registry;
pub mod service;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    BundleError, ContentChecksum, Origin, RecordId, ServiceId, Version, VersionFormatError,
};

// =============================================================================
// RE-EXPORTS: Lifecycle
// =============================================================================

pub use conflict::BundleConflict;
pub use lifecycle::{Expiration, Stage, Transition};
pub use record::BundleRecord;
pub use registry::{ActiveBundles, BundleRegistry};
pub use service::{ServiceProxy, ServiceView};

// =============================================================================
// RE-EXPORTS: Collaborators (from engine, package and config modules)
// =============================================================================

pub use config::{ConfigError, EngineConfig};
pub use engine::{
    Activator, ActivatorContext, ActivatorError, Engine, EngineError, EngineFactory, EngineHandle,
    InMemoryEngine, MemoryEngineFactory, ServiceInterface, ServiceReference, activator_fn,
};
pub use package::{
    BundleDescriptor, DirectoryPackageReader, InMemoryPackageReader, PackageContents,
    PackageError, PackageReader,
};
