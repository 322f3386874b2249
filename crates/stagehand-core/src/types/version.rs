//! Bundle version triple.
//!
//! Versions are kept as three string components exactly as written in the
//! descriptor. Only equality is defined; no ordering is implied between two
//! versions, numeric or lexicographic.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// A `major.minor.patch` version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    major: String,
    minor: String,
    patch: String,
}

impl Version {
    /// Parse a version string of the form `x.y.z`.
    pub fn parse(value: &str) -> Result<Self, VersionFormatError> {
        let parts: Vec<&str> = value.trim().split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(VersionFormatError {
                version_string: value.to_string(),
                actual_parts: parts.iter().filter(|p| !p.is_empty()).count(),
            });
        }
        Ok(Self {
            major: parts[0].to_string(),
            minor: parts[1].to_string(),
            patch: parts[2].to_string(),
        })
    }

    #[must_use]
    pub fn major(&self) -> &str {
        &self.major
    }

    #[must_use]
    pub fn minor(&self) -> &str {
        &self.minor
    }

    #[must_use]
    pub fn patch(&self) -> &str {
        &self.patch
    }
}

impl FromStr for Version {
    type Err = VersionFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A version string did not have exactly three non-empty parts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("version `{version_string}` must have exactly three parts, found {actual_parts}")]
pub struct VersionFormatError {
    pub version_string: String,
    pub actual_parts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_triplet() {
        let version = Version::parse("1.12.0").expect("parse");
        assert_eq!(version.major(), "1");
        assert_eq!(version.minor(), "12");
        assert_eq!(version.patch(), "0");
        assert_eq!(version.to_string(), "1.12.0");
    }

    #[test]
    fn components_are_kept_as_written() {
        let version: Version = "2.0.0-SNAPSHOT".parse().expect("parse");
        assert_eq!(version.patch(), "0-SNAPSHOT");
        assert_ne!(version, Version::parse("2.0.0").expect("parse"));
    }

    #[test]
    fn rejects_wrong_part_count() {
        let err = Version::parse("1.0").expect_err("two parts");
        assert_eq!(err.actual_parts, 2);
        assert_eq!(err.version_string, "1.0");

        let err = Version::parse("1.0.0.1").expect_err("four parts");
        assert_eq!(err.actual_parts, 4);
    }

    #[test]
    fn rejects_empty_components() {
        assert!(Version::parse("1..0").is_err());
        assert!(Version::parse("").is_err());
    }
}
