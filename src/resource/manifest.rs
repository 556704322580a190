//! Content manifest - maps logical addresses to content packages
//!
//! The manifest is produced by the build pipeline alongside the package
//! files. It is immutable at runtime; a new content version is activated by
//! swapping the whole manifest.
//!
//! # Manifest File Format
//! ```text
//! {
//!   "name": "main",
//!   "version": 12,
//!   "timestamp": 1718000000000,
//!   "extension": "pack",
//!   "packages": [
//!     { "name": "map_common", "hash": "9f2c...", "size": 1024, "dependencies": [] }
//!   ],
//!   "assets": [
//!     { "address": "maps/ground.mat", "package": "map_common", "dependencies": [] }
//!   ]
//! }
//! ```
//!
//! Package files are content-addressed: `<name>_<hash>.<ext>`, so any
//! change to a package's content yields a new file name.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Extension used for package files whose name carries none
pub const DEFAULT_PACKAGE_EXTENSION: &str = "pack";

/// Error type for manifest operations
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("I/O error reading manifest: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate address in manifest: {0}")]
    DuplicateAddress(String),

    #[error("Duplicate package in manifest: {0}")]
    DuplicatePackage(String),

    #[error("'{owner}' references unknown package '{package}'")]
    UnknownPackage { owner: String, package: String },

    #[error("Resource not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, ManifestError>;

/// A physical content package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    /// Logical package name (may carry its own extension)
    pub name: String,
    /// Content hash written by the build pipeline
    pub hash: String,
    /// Size of the package file in bytes (0 if unknown)
    #[serde(default)]
    pub size: u64,
    /// Packages this package cannot be loaded without
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PackageDescriptor {
    pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
            size: 0,
            dependencies: Vec::new(),
        }
    }
}

/// An addressable resource inside a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Logical address used by requesters
    pub address: String,
    /// Package holding the resource
    pub package: String,
    /// Other addresses this resource references
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl AssetEntry {
    pub fn new(address: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            package: package.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

/// On-disk layout of the manifest
#[derive(Debug, Serialize, Deserialize)]
struct ManifestFile {
    name: String,
    version: u32,
    timestamp: i64,
    #[serde(default = "default_extension")]
    extension: String,
    #[serde(default)]
    packages: Vec<PackageDescriptor>,
    #[serde(default)]
    assets: Vec<AssetEntry>,
}

fn default_extension() -> String {
    DEFAULT_PACKAGE_EXTENSION.to_string()
}

/// Build the content-addressed file name of a package.
///
/// The hash is inserted before the package's own extension when it has one,
/// otherwise `default_extension` is appended.
pub fn package_file_name(name: &str, hash: &str, default_extension: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains('/') => {
            format!("{}_{}.{}", stem, hash, ext)
        }
        _ => format!("{}_{}.{}", name, hash, default_extension),
    }
}

/// File name of the manifest for a content configuration
pub fn manifest_file_name(name: &str) -> String {
    format!("{}.json", name)
}

/// Content manifest - immutable address → package table
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    name: String,
    version: u32,
    timestamp: i64,
    extension: String,
    packages: HashMap<String, PackageDescriptor>,
    assets: HashMap<String, AssetEntry>,
}

impl Manifest {
    /// Create an empty manifest
    pub fn new(name: impl Into<String>, version: u32, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            version,
            timestamp,
            extension: default_extension(),
            packages: HashMap::new(),
            assets: HashMap::new(),
        }
    }

    /// Parse and validate a manifest from a reader
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let file: ManifestFile = serde_json::from_reader(reader)?;

        let mut manifest = Self::new(file.name, file.version, file.timestamp);
        manifest.extension = file.extension;

        for package in file.packages {
            if manifest.packages.contains_key(&package.name) {
                return Err(ManifestError::DuplicatePackage(package.name));
            }
            manifest.insert_package(package);
        }
        for asset in file.assets {
            if manifest.assets.contains_key(&asset.address) {
                return Err(ManifestError::DuplicateAddress(asset.address));
            }
            manifest.insert_asset(asset);
        }

        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse a manifest from a file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::parse(io::BufReader::new(file))
    }

    /// Parse a manifest from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        Self::parse(s.as_bytes())
    }

    /// Serialize to the on-disk JSON layout, sorted for stable output
    pub fn to_json(&self) -> Result<String> {
        let mut packages: Vec<_> = self.packages.values().cloned().collect();
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        let mut assets: Vec<_> = self.assets.values().cloned().collect();
        assets.sort_by(|a, b| a.address.cmp(&b.address));

        let file = ManifestFile {
            name: self.name.clone(),
            version: self.version,
            timestamp: self.timestamp,
            extension: self.extension.clone(),
            packages,
            assets,
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Check that every reference points at a known package
    pub fn validate(&self) -> Result<()> {
        for asset in self.assets.values() {
            if !self.packages.contains_key(&asset.package) {
                return Err(ManifestError::UnknownPackage {
                    owner: asset.address.clone(),
                    package: asset.package.clone(),
                });
            }
        }
        for package in self.packages.values() {
            for dependency in &package.dependencies {
                if !self.packages.contains_key(dependency) {
                    return Err(ManifestError::UnknownPackage {
                        owner: package.name.clone(),
                        package: dependency.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Insert a package descriptor, replacing any with the same name
    pub fn insert_package(&mut self, package: PackageDescriptor) {
        self.packages.insert(package.name.clone(), package);
    }

    /// Insert an asset entry, replacing any with the same address
    pub fn insert_asset(&mut self, asset: AssetEntry) {
        self.assets.insert(asset.address.clone(), asset);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Look up an address
    pub fn asset(&self, address: &str) -> Option<&AssetEntry> {
        self.assets.get(address)
    }

    /// Look up an address, returning an error if not found
    pub fn get(&self, address: &str) -> Result<&AssetEntry> {
        self.asset(address)
            .ok_or_else(|| ManifestError::NotFound(address.to_string()))
    }

    /// Look up a package by name
    pub fn package(&self, name: &str) -> Option<&PackageDescriptor> {
        self.packages.get(name)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.assets.contains_key(address)
    }

    /// Number of addressable resources
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Iterate over all addresses
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.assets.keys().map(String::as_str)
    }

    /// Content-addressed file name of a package
    pub fn package_file_name(&self, package: &str) -> Option<String> {
        self.packages
            .get(package)
            .map(|p| package_file_name(&p.name, &p.hash, &self.extension))
    }

    /// Every package needed to load `address`, its own package first.
    ///
    /// Follows address dependencies transitively, then the declared
    /// package-level dependencies of every package found, without
    /// duplicates. Returns `None` when the address is not in the manifest.
    /// Dependency addresses missing from the manifest are logged and skipped.
    pub fn dependency_packages(&self, address: &str) -> Option<Vec<String>> {
        let entry = self.asset(address)?;

        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(entry.package.as_str());
        queue.extend(
            self.dependency_closure(entry)
                .into_iter()
                .map(|dep| dep.package.as_str()),
        );

        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        while let Some(package) = queue.pop_front() {
            if !seen.insert(package) {
                continue;
            }
            if let Some(descriptor) = self.packages.get(package) {
                queue.extend(descriptor.dependencies.iter().map(String::as_str));
            }
            ordered.push(package.to_string());
        }

        Some(ordered)
    }

    /// Transitive dependency addresses of `address` with their packages,
    /// nearest first
    pub fn dependency_assets(&self, address: &str) -> Vec<&AssetEntry> {
        self.asset(address)
            .map(|entry| self.dependency_closure(entry))
            .unwrap_or_default()
    }

    /// Breadth-first walk over address dependencies, excluding `root`
    fn dependency_closure<'a>(&'a self, root: &'a AssetEntry) -> Vec<&'a AssetEntry> {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(root.address.as_str());

        let mut closure = Vec::new();
        let mut queue: VecDeque<&AssetEntry> = VecDeque::new();
        queue.push_back(root);

        while let Some(entry) = queue.pop_front() {
            for dependency in &entry.dependencies {
                if !visited.insert(dependency.as_str()) {
                    continue;
                }
                match self.asset(dependency) {
                    Some(dep) => {
                        closure.push(dep);
                        queue.push_back(dep);
                    }
                    None => log::warn!(
                        "Manifest '{}': '{}' depends on unknown address '{}'",
                        self.name,
                        entry.address,
                        dependency
                    ),
                }
            }
        }
        closure
    }
}
