//! # Conflict Module
//!
//! Detects bundles that would fight over the same identity or classes.
//!
//! Two live records conflict when:
//! - their symbolic names are exactly equal, or
//! - they both define a class entry whose content checksums differ.
//!
//! Class entries with equal checksums are byte-identical definitions and
//! never count. Results are computed on demand against the current registry
//! contents; nothing is cached.

use crate::record::BundleRecord;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Evidence that another record collides with the one inspected.
#[derive(Debug, Clone)]
pub struct BundleConflict {
    record: Arc<BundleRecord>,
    classes: BTreeSet<String>,
    symbolic_name: bool,
}

impl BundleConflict {
    #[must_use]
    pub fn new(record: Arc<BundleRecord>, classes: BTreeSet<String>, symbolic_name: bool) -> Self {
        Self {
            record,
            classes,
            symbolic_name,
        }
    }

    /// The other record.
    #[must_use]
    pub fn record(&self) -> &Arc<BundleRecord> {
        &self.record
    }

    /// Class entries defined by both records with differing content.
    #[must_use]
    pub fn classes(&self) -> &BTreeSet<String> {
        &self.classes
    }

    /// Whether both records carry the same symbolic name.
    #[must_use]
    pub fn is_symbolic_name_conflict(&self) -> bool {
        self.symbolic_name
    }

    fn key(&self) -> (crate::RecordId, &BTreeSet<String>, bool) {
        (self.record.id(), &self.classes, self.symbolic_name)
    }
}

impl PartialEq for BundleConflict {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for BundleConflict {}

impl std::hash::Hash for BundleConflict {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for BundleConflict {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BundleConflict {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Conflicts between `subject` and every other record in `records`.
///
/// `subject` itself is skipped by identity, so passing a slice that contains
/// it is fine.
pub(crate) fn detect(subject: &BundleRecord, records: &[Arc<BundleRecord>]) -> BTreeSet<BundleConflict> {
    records
        .iter()
        .filter(|other| other.id() != subject.id())
        .filter_map(|other| compare(subject, other))
        .collect()
}

fn compare(subject: &BundleRecord, other: &Arc<BundleRecord>) -> Option<BundleConflict> {
    let mine = subject.descriptor().class_entries();
    let theirs = other.descriptor().class_entries();

    // Walk the smaller map, look up in the larger one.
    let (small, large) = if mine.len() <= theirs.len() {
        (mine, theirs)
    } else {
        (theirs, mine)
    };
    let classes: BTreeSet<String> = small
        .iter()
        .filter(|(name, checksum)| large.get(*name).is_some_and(|c| c != *checksum))
        .map(|(name, _)| name.clone())
        .collect();

    let symbolic_name = subject.symbolic_name() == other.symbolic_name();

    if classes.is_empty() && !symbolic_name {
        None
    } else {
        Some(BundleConflict::new(other.clone(), classes, symbolic_name))
    }
}

impl std::fmt::Display for BundleConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.record.symbolic_name_with_version())?;
        if self.symbolic_name {
            f.write_str(" [same symbolic name]")?;
        }
        if !self.classes.is_empty() {
            write!(f, " [{} class(es)]", self.classes.len())?;
        }
        Ok(())
    }
}
