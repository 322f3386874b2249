//! # Conflict Report
//!
//! Serializable snapshot of a registry's conflicts, rendered either as
//! plain text or as JSON.

use serde::Serialize;
use stagehand_core::{BundleConflict, BundleRecord};
use std::collections::BTreeSet;
use std::fmt::Write;
use std::sync::Arc;

// =============================================================================
// REPORT TYPES
// =============================================================================

/// Everything one report run found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    /// Registered bundles in registry order.
    pub bundles: Vec<BundleEntry>,
    /// Packages that could not be registered.
    pub rejected: Vec<RejectedPackage>,
}

/// One registered bundle and what it collides with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleEntry {
    /// `name:version`
    pub bundle: String,
    pub origin: String,
    pub conflicts: Vec<ConflictEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictEntry {
    /// `name:version` of the other bundle.
    pub bundle: String,
    pub symbolic_name: bool,
    pub classes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedPackage {
    pub origin: String,
    pub reason: String,
}

impl ConflictReport {
    /// Build the bundle section from a registry conflict scan.
    #[must_use]
    pub fn from_scan(scan: &[(Arc<BundleRecord>, BTreeSet<BundleConflict>)]) -> Self {
        let bundles = scan
            .iter()
            .map(|(record, conflicts)| BundleEntry {
                bundle: record.symbolic_name_with_version(),
                origin: record.origin().to_string(),
                conflicts: conflicts
                    .iter()
                    .map(|conflict| ConflictEntry {
                        bundle: conflict.record().symbolic_name_with_version(),
                        symbolic_name: conflict.is_symbolic_name_conflict(),
                        classes: conflict.classes().iter().cloned().collect(),
                    })
                    .collect(),
            })
            .collect();
        Self {
            bundles,
            rejected: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_rejected(mut self, rejected: Vec<RejectedPackage>) -> Self {
        self.rejected = rejected;
        self
    }

    /// Number of bundles involved in at least one conflict.
    #[must_use]
    pub fn conflicting_bundles(&self) -> usize {
        self.bundles.iter().filter(|b| !b.conflicts.is_empty()).count()
    }

    // =========================================================================
    // RENDERING
    // =========================================================================

    /// Human-readable report.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "==== CONFLICTS ====");
        for bundle in &self.bundles {
            let _ = writeln!(out, "Bundle: {}", bundle.bundle);
            for (i, conflict) in bundle.conflicts.iter().enumerate() {
                let name = if conflict.symbolic_name {
                    " in name and"
                } else {
                    ""
                };
                let _ = writeln!(
                    out,
                    "#{} {}:{} in {} class(es):",
                    i + 1,
                    conflict.bundle,
                    name,
                    conflict.classes.len()
                );
                for class in &conflict.classes {
                    let _ = writeln!(out, " • {}", class);
                }
            }
        }

        if !self.rejected.is_empty() {
            let _ = writeln!(out, "==== REJECTED ====");
            for rejected in &self.rejected {
                let _ = writeln!(out, "{}: {}", rejected.origin, rejected.reason);
            }
        }
        out
    }

    /// Pretty-printed JSON report.
    pub fn render_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConflictReport {
        ConflictReport {
            bundles: vec![
                BundleEntry {
                    bundle: "org.a:1.0.0".to_string(),
                    origin: "/bundles/a".to_string(),
                    conflicts: vec![ConflictEntry {
                        bundle: "org.a:2.0.0".to_string(),
                        symbolic_name: true,
                        classes: vec!["org/a/Impl.class".to_string()],
                    }],
                },
                BundleEntry {
                    bundle: "org.b:1.0.0".to_string(),
                    origin: "/bundles/b".to_string(),
                    conflicts: vec![ConflictEntry {
                        bundle: "org.c:1.0.0".to_string(),
                        symbolic_name: false,
                        classes: vec![],
                    }],
                },
            ],
            rejected: vec![RejectedPackage {
                origin: "/bundles/broken".to_string(),
                reason: "descriptor is missing mandatory attribute `Bundle-Version`".to_string(),
            }],
        }
    }

    #[test]
    fn text_layout() {
        let text = sample().render_text();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "==== CONFLICTS ====",
                "Bundle: org.a:1.0.0",
                "#1 org.a:2.0.0: in name and in 1 class(es):",
                " • org/a/Impl.class",
                "Bundle: org.b:1.0.0",
                "#1 org.c:1.0.0: in 0 class(es):",
                "==== REJECTED ====",
                "/bundles/broken: descriptor is missing mandatory attribute `Bundle-Version`",
            ]
        );
    }

    #[test]
    fn rejected_section_only_when_needed() {
        let report = ConflictReport::default();
        assert_eq!(report.render_text(), "==== CONFLICTS ====\n");
        assert_eq!(report.conflicting_bundles(), 0);
        assert_eq!(sample().conflicting_bundles(), 2);
    }

    #[test]
    fn json_keeps_field_order() {
        let json = sample().render_json().expect("encode");
        let bundles = json.find("\"bundles\"").expect("bundles key");
        let rejected = json.find("\"rejected\"").expect("rejected key");
        assert!(bundles < rejected);
        assert!(json.contains("\"symbolic_name\": true"));
    }
}
