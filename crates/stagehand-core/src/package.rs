//! # Package Module
//!
//! Reading and validating bundle packages.
//!
//! A [`PackageReader`] turns an [`Origin`] into raw [`PackageContents`]:
//! descriptor attributes plus checksummed class entries. The registry then
//! validates those contents into a [`BundleDescriptor`] before any record
//! exists.
//!
//! Two readers ship with the crate:
//! - [`DirectoryPackageReader`] reads a package directory from disk
//! - [`InMemoryPackageReader`] serves contents inserted by the host

use crate::{ContentChecksum, Origin, Version, VersionFormatError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

// =============================================================================
// DESCRIPTOR KEYS
// =============================================================================

/// Descriptor attribute naming the bundle.
pub const SYMBOLIC_NAME_KEY: &str = "Bundle-SymbolicName";

/// Descriptor attribute holding the `x.y.z` version.
pub const VERSION_KEY: &str = "Bundle-Version";

/// Descriptor attribute naming the entry point started by the engine.
pub const ACTIVATOR_KEY: &str = "Bundle-Activator";

/// File holding the descriptor inside a package directory.
pub const DESCRIPTOR_FILE: &str = "bundle.toml";

/// Extension marking a class entry inside a package directory.
pub const CLASS_EXTENSION: &str = "class";

// =============================================================================
// ERRORS
// =============================================================================

/// Why a package was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackageError {
    #[error("cannot read package at {origin}: {reason}")]
    Unreadable { origin: Origin, reason: String },

    #[error("malformed descriptor at {origin}: {reason}")]
    Descriptor { origin: Origin, reason: String },

    #[error("descriptor is missing mandatory attribute `{0}`")]
    MissingAttribute(&'static str),

    #[error("class entry `{0}` is defined more than once")]
    DuplicateClassEntry(String),

    #[error(transparent)]
    InvalidVersion(#[from] VersionFormatError),
}

// =============================================================================
// RAW CONTENTS
// =============================================================================

/// One class definition inside a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassEntry {
    pub name: String,
    pub checksum: ContentChecksum,
}

/// Unvalidated result of reading a package.
///
/// Class entries are kept as a list so duplicates survive until validation
/// rejects them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageContents {
    attributes: BTreeMap<String, String>,
    class_entries: Vec<ClassEntry>,
}

impl PackageContents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the three mandatory attributes in one go.
    #[must_use]
    pub fn with_descriptor(self, symbolic_name: &str, version: &str, activator: &str) -> Self {
        self.with_attribute(SYMBOLIC_NAME_KEY, symbolic_name)
            .with_attribute(VERSION_KEY, version)
            .with_attribute(ACTIVATOR_KEY, activator)
    }

    /// Add a class entry with a known checksum.
    #[must_use]
    pub fn with_class(mut self, name: impl Into<String>, checksum: ContentChecksum) -> Self {
        self.class_entries.push(ClassEntry {
            name: name.into(),
            checksum,
        });
        self
    }

    /// Add a class entry, checksumming its bytes.
    #[must_use]
    pub fn with_class_bytes(self, name: impl Into<String>, content: &[u8]) -> Self {
        self.with_class(name, ContentChecksum::of(content))
    }

    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    #[must_use]
    pub fn class_entries(&self) -> &[ClassEntry] {
        &self.class_entries
    }
}

// =============================================================================
// VALIDATED DESCRIPTOR
// =============================================================================

/// Validated bundle metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleDescriptor {
    symbolic_name: String,
    version: Version,
    activator: String,
    attributes: BTreeMap<String, String>,
    class_entries: BTreeMap<String, ContentChecksum>,
}

impl BundleDescriptor {
    /// Validate raw package contents.
    ///
    /// Fails if a mandatory attribute is missing or blank, if the version is
    /// not `x.y.z`, or if a class entry name appears twice.
    pub fn from_contents(contents: PackageContents) -> Result<Self, PackageError> {
        let PackageContents {
            attributes,
            class_entries,
        } = contents;

        let symbolic_name = mandatory(&attributes, SYMBOLIC_NAME_KEY)?;
        let version = Version::parse(&mandatory(&attributes, VERSION_KEY)?)?;
        let activator = mandatory(&attributes, ACTIVATOR_KEY)?;

        let mut classes = BTreeMap::new();
        for entry in class_entries {
            if classes.insert(entry.name.clone(), entry.checksum).is_some() {
                return Err(PackageError::DuplicateClassEntry(entry.name));
            }
        }

        Ok(Self {
            symbolic_name,
            version,
            activator,
            attributes,
            class_entries: classes,
        })
    }

    #[must_use]
    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    #[must_use]
    pub fn activator(&self) -> &str {
        &self.activator
    }

    /// All descriptor attributes, mandatory ones included.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Class entry names mapped to their content checksums.
    #[must_use]
    pub fn class_entries(&self) -> &BTreeMap<String, ContentChecksum> {
        &self.class_entries
    }
}

fn mandatory(
    attributes: &BTreeMap<String, String>,
    key: &'static str,
) -> Result<String, PackageError> {
    attributes
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(PackageError::MissingAttribute(key))
}

// =============================================================================
// READERS
// =============================================================================

/// Source of package contents.
pub trait PackageReader: Send + Sync {
    /// Read the package behind `origin`.
    fn read(&self, origin: &Origin) -> Result<PackageContents, PackageError>;
}

/// Reads packages laid out as directories.
///
/// ```text
/// my-bundle/
///   bundle.toml          Bundle-SymbolicName = "org.example"
///   org/example/A.class  class entry "org/example/A.class"
/// ```
///
/// Descriptor values must all be strings. Files without the `.class`
/// extension are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryPackageReader;

impl DirectoryPackageReader {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PackageReader for DirectoryPackageReader {
    fn read(&self, origin: &Origin) -> Result<PackageContents, PackageError> {
        let root = origin.as_path();
        let unreadable = |reason: String| PackageError::Unreadable {
            origin: origin.clone(),
            reason,
        };

        if !root.is_dir() {
            return Err(unreadable("not a package directory".to_string()));
        }

        let raw = std::fs::read_to_string(root.join(DESCRIPTOR_FILE))
            .map_err(|e| unreadable(format!("{}: {}", DESCRIPTOR_FILE, e)))?;
        let attributes: BTreeMap<String, String> =
            toml::from_str(&raw).map_err(|e| PackageError::Descriptor {
                origin: origin.clone(),
                reason: e.to_string(),
            })?;

        let mut files = Vec::new();
        collect_class_files(root, root, &mut files).map_err(|e| unreadable(e.to_string()))?;

        let mut contents = PackageContents {
            attributes,
            class_entries: Vec::with_capacity(files.len()),
        };
        for (name, path) in files {
            let bytes = std::fs::read(&path).map_err(|e| unreadable(format!("{}: {}", name, e)))?;
            contents = contents.with_class_bytes(name, &bytes);
        }
        Ok(contents)
    }
}

/// Depth-first walk in file name order, so entry order is stable.
fn collect_class_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, std::path::PathBuf)>,
) -> std::io::Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_class_files(root, &path, out)?;
        } else if path.extension().is_some_and(|ext| ext == CLASS_EXTENSION) {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((name, path));
        }
    }
    Ok(())
}

/// Serves contents the host inserted by origin.
#[derive(Debug, Default)]
pub struct InMemoryPackageReader {
    packages: RwLock<BTreeMap<Origin, PackageContents>>,
}

impl InMemoryPackageReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a package, returning the one it replaces.
    pub fn insert(
        &self,
        origin: impl Into<Origin>,
        contents: PackageContents,
    ) -> Option<PackageContents> {
        self.packages.write().insert(origin.into(), contents)
    }

    /// Forget a package. Later reads of its origin fail as unreadable.
    pub fn remove(&self, origin: &Origin) -> Option<PackageContents> {
        self.packages.write().remove(origin)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.read().is_empty()
    }
}

impl PackageReader for InMemoryPackageReader {
    fn read(&self, origin: &Origin) -> Result<PackageContents, PackageError> {
        self.packages
            .read()
            .get(origin)
            .cloned()
            .ok_or_else(|| PackageError::Unreadable {
                origin: origin.clone(),
                reason: "no package stored under this origin".to_string(),
            })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PackageContents {
        PackageContents::new().with_descriptor("org.example", "1.0.0", "org.example.Activator")
    }

    #[test]
    fn valid_contents_produce_descriptor() {
        let descriptor = BundleDescriptor::from_contents(
            valid()
                .with_attribute("Bundle-Vendor", "Example")
                .with_class_bytes("org/example/A.class", b"A"),
        )
        .expect("valid");

        assert_eq!(descriptor.symbolic_name(), "org.example");
        assert_eq!(descriptor.version().to_string(), "1.0.0");
        assert_eq!(descriptor.activator(), "org.example.Activator");
        assert_eq!(
            descriptor.attributes().get("Bundle-Vendor").map(String::as_str),
            Some("Example")
        );
        assert_eq!(
            descriptor.class_entries().get("org/example/A.class"),
            Some(&ContentChecksum::of(b"A"))
        );
    }

    #[test]
    fn missing_mandatory_attributes_are_rejected() {
        let contents = PackageContents::new()
            .with_attribute(SYMBOLIC_NAME_KEY, "org.example")
            .with_attribute(VERSION_KEY, "1.0.0");
        assert_eq!(
            BundleDescriptor::from_contents(contents),
            Err(PackageError::MissingAttribute(ACTIVATOR_KEY))
        );

        let blank = valid().with_attribute(SYMBOLIC_NAME_KEY, "  ");
        assert_eq!(
            BundleDescriptor::from_contents(blank),
            Err(PackageError::MissingAttribute(SYMBOLIC_NAME_KEY))
        );
    }

    #[test]
    fn malformed_version_is_rejected() {
        let contents = valid().with_attribute(VERSION_KEY, "1.0");
        let err = BundleDescriptor::from_contents(contents).expect_err("two parts");
        assert!(matches!(
            err,
            PackageError::InvalidVersion(VersionFormatError {
                actual_parts: 2,
                ..
            })
        ));
    }

    #[test]
    fn duplicate_class_entry_is_rejected() {
        let contents = valid()
            .with_class_bytes("A.class", b"one")
            .with_class_bytes("A.class", b"two");
        assert_eq!(
            BundleDescriptor::from_contents(contents),
            Err(PackageError::DuplicateClassEntry("A.class".to_string()))
        );
    }

    #[test]
    fn in_memory_reader_serves_and_forgets() {
        let reader = InMemoryPackageReader::new();
        let origin = Origin::new("mem://a");
        assert!(reader.read(&origin).is_err());

        reader.insert(origin.clone(), valid());
        assert_eq!(reader.read(&origin).expect("stored"), valid());
        assert_eq!(reader.len(), 1);

        reader.remove(&origin);
        assert!(matches!(
            reader.read(&origin),
            Err(PackageError::Unreadable { .. })
        ));
        assert!(reader.is_empty());
    }

    #[test]
    fn directory_reader_walks_class_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(DESCRIPTOR_FILE),
            "Bundle-SymbolicName = \"org.dir\"\nBundle-Version = \"2.1.0\"\nBundle-Activator = \"org.dir.Main\"\n",
        )
        .expect("write descriptor");
        std::fs::create_dir_all(dir.path().join("org/dir")).expect("mkdir");
        std::fs::write(dir.path().join("org/dir/B.class"), b"B").expect("write");
        std::fs::write(dir.path().join("org/dir/A.class"), b"A").expect("write");
        std::fs::write(dir.path().join("org/dir/notes.txt"), b"ignored").expect("write");

        let origin = Origin::from_path(dir.path()).expect("origin");
        let contents = DirectoryPackageReader::new().read(&origin).expect("read");
        let names: Vec<&str> = contents
            .class_entries()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["org/dir/A.class", "org/dir/B.class"]);

        let descriptor = BundleDescriptor::from_contents(contents).expect("valid");
        assert_eq!(descriptor.symbolic_name(), "org.dir");
    }

    #[test]
    fn directory_reader_rejects_bad_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let origin = Origin::from_path(dir.path()).expect("origin");

        // no descriptor
        assert!(matches!(
            DirectoryPackageReader::new().read(&origin),
            Err(PackageError::Unreadable { .. })
        ));

        std::fs::write(dir.path().join(DESCRIPTOR_FILE), "Bundle-Version = 1").expect("write");
        assert!(matches!(
            DirectoryPackageReader::new().read(&origin),
            Err(PackageError::Descriptor { .. })
        ));

        let missing = Origin::from_path(dir.path().join("absent")).expect("origin");
        assert!(DirectoryPackageReader::new().read(&missing).is_err());
    }
}
