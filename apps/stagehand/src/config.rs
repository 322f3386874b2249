//! # Config Layering
//!
//! The engine configuration is assembled in three layers, later ones
//! adding to earlier ones:
//!
//! 1. the `--config` TOML file, if given
//! 2. `STAGEHAND_EXTRA_EXPORTS`, a comma-separated list
//! 3. `-d/--dependencies` values

use crate::CliError;
use stagehand_core::EngineConfig;
use std::path::Path;

/// Environment variable holding extra host exports.
pub const EXTRA_EXPORTS_ENV: &str = "STAGEHAND_EXTRA_EXPORTS";

/// Merge the three layers into one engine configuration.
pub fn resolve(
    file: Option<&Path>,
    env_exports: Option<&str>,
    dependencies: &[String],
) -> Result<EngineConfig, CliError> {
    let base = match file {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let config = base
        .with_exports(env_exports.unwrap_or_default().split(','))
        .with_exports(dependencies);
    tracing::debug!(exports = config.extra_exports.len(), "engine configuration resolved");
    Ok(config)
}

/// [`resolve`] with the environment layer read from the process.
pub fn resolve_from_env(file: Option<&Path>, dependencies: &[String]) -> Result<EngineConfig, CliError> {
    let env_exports = std::env::var(EXTRA_EXPORTS_ENV).ok();
    resolve(file, env_exports.as_deref(), dependencies)
}

// =============================================================================
// TESTS
// =============================================================================
