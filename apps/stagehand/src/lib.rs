//! # stagehand
//!
//! Conflict report tool for bundle packages - THE BINARY.
//!
//! Registers every package named on the command line with a
//! [`stagehand_core::BundleRegistry`] and reports which bundles collide,
//! by symbolic name or by differing class entries.
//!
//! ## Modules
//!
//! - `cli` → argument parsing and command execution
//! - `config` → engine settings merged from file, environment and flags
//! - `report` → serializable report plus text rendering

pub mod cli;
pub mod config;
pub mod report;

use stagehand_core::{BundleError, ConfigError};
use thiserror::Error;

/// Errors that abort a report run.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] BundleError),

    #[error("cannot encode report: {0}")]
    Json(#[from] serde_json::Error),
}
