//! # Engine Configuration
//!
//! Settings handed to an [`EngineFactory`](crate::engine::EngineFactory) when
//! a registry launches its engine. Read from TOML:
//!
//! ```toml
//! extra_exports = ["org.slf4j", "javax.annotation"]
//! clean_storage_on_init = true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Engine launch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Host packages made visible to bundles.
    pub extra_exports: BTreeSet<String>,
    /// Drop installed bundles left over from an earlier attach.
    pub clean_storage_on_init: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extra_exports: BTreeSet::new(),
            clean_storage_on_init: true,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Unknown keys are rejected.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Add host exports, skipping blanks and surrounding whitespace.
    #[must_use]
    pub fn with_exports<I, S>(mut self, exports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extra_exports.extend(
            exports
                .into_iter()
                .map(|e| e.as_ref().trim().to_string())
                .filter(|e| !e.is_empty()),
        );
        self
    }
}
