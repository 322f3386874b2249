//! # CLI Command Implementations

use crate::CliError;
use crate::report::{ConflictReport, RejectedPackage};
use stagehand_core::{
    BundleRegistry, DirectoryPackageReader, EngineConfig, MemoryEngineFactory, Origin,
};
use std::path::PathBuf;
use std::sync::Arc;

// =============================================================================
// REPORT COMMAND
// =============================================================================

/// Register every package in `files` and collect the conflict report.
///
/// A package that cannot be registered is listed as rejected and the run
/// carries on with the rest. The registry is shut down before returning.
pub fn cmd_report(files: &[PathBuf], config: &EngineConfig) -> Result<ConflictReport, CliError> {
    let reader = Arc::new(DirectoryPackageReader::new());
    let factory = MemoryEngineFactory::new(reader.clone());
    let registry = BundleRegistry::launch(&factory, config, reader)?;

    let mut rejected = Vec::new();
    for file in files {
        let origin = match Origin::from_path(file) {
            Ok(origin) => origin,
            Err(e) => {
                rejected.push(reject(file.display().to_string(), e.to_string()));
                continue;
            }
        };
        if let Err(e) = registry.register(origin.clone()) {
            rejected.push(reject(origin.to_string(), e.to_string()));
        }
    }

    let report = ConflictReport::from_scan(&registry.conflict_report()?).with_rejected(rejected);
    tracing::info!(
        registered = report.bundles.len(),
        rejected = report.rejected.len(),
        conflicting = report.conflicting_bundles(),
        "conflict scan complete"
    );

    registry.shutdown()?;
    Ok(report)
}

fn reject(origin: String, reason: String) -> RejectedPackage {
    tracing::warn!(origin = %origin, reason = %reason, "package rejected");
    RejectedPackage { origin, reason }
}
