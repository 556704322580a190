//! Host collaborator interface
//!
//! The engine never decodes packages, builds scene graphs or touches the
//! renderer itself. Everything that does real work goes through
//! [`ContentBackend`], which is polled once per tick in the same
//! cooperative style as the loadables themselves.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Outcome of one poll of a backend operation
#[derive(Debug, Clone, PartialEq)]
pub enum LoadPoll<T> {
    /// Still running, with progress in 0..=1
    Pending(f32),
    Ready(T),
    Failed(String),
}

/// Where an object is deserialized from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectSource<'a> {
    /// An opened content package, by package name
    Package(&'a str),
    /// A loose file (direct mode)
    File(&'a Path),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Plain data (texture, material, mesh, ...)
    Data,
    /// An instantiated scene-graph node, owned by the host once created
    SceneNode,
}

impl ObjectKind {
    pub fn for_address(address: &str) -> Self {
        if address.to_ascii_lowercase().ends_with(".prefab") {
            ObjectKind::SceneNode
        } else {
            ObjectKind::Data
        }
    }
}

/// A materialized object handed back by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedObject {
    /// Backend-assigned identity, also used as the usage-table consumer id
    pub id: u64,
    pub address: String,
    pub kind: ObjectKind,
    pub bytes: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneMode {
    /// Replace the active scene
    Single,
    /// Add on top of the active scene
    Additive,
}

/// Operations the engine needs from its host.
///
/// Poll methods are called repeatedly until they return `Ready` or `Failed`.
/// The `*_now` variants back immediate loads and must not return until the
/// operation has finished; by default they spin on the poll method.
pub trait ContentBackend {
    fn poll_package(&mut self, name: &str, path: &Path) -> LoadPoll<()>;

    fn poll_object(&mut self, source: ObjectSource<'_>, address: &str) -> LoadPoll<LoadedObject>;

    fn poll_scene(&mut self, address: &str, mode: SceneMode) -> LoadPoll<()>;

    fn close_package(&mut self, name: &str);

    fn release_object(&mut self, object: &LoadedObject);

    fn unload_scene(&mut self, address: &str);

    fn exists(&self, path: &Path) -> bool;

    fn open_package_now(&mut self, name: &str, path: &Path) -> Result<(), String> {
        loop {
            match self.poll_package(name, path) {
                LoadPoll::Pending(_) => continue,
                LoadPoll::Ready(()) => return Ok(()),
                LoadPoll::Failed(err) => return Err(err),
            }
        }
    }

    fn load_object_now(
        &mut self,
        source: ObjectSource<'_>,
        address: &str,
    ) -> Result<LoadedObject, String> {
        loop {
            match self.poll_object(source, address) {
                LoadPoll::Pending(_) => continue,
                LoadPoll::Ready(object) => return Ok(object),
                LoadPoll::Failed(err) => return Err(err),
            }
        }
    }

    fn activate_scene_now(&mut self, address: &str, mode: SceneMode) -> Result<(), String> {
        loop {
            match self.poll_scene(address, mode) {
                LoadPoll::Pending(_) => continue,
                LoadPoll::Ready(()) => return Ok(()),
                LoadPoll::Failed(err) => return Err(err),
            }
        }
    }
}

/// Headless backend over local files.
///
/// Opening a package reads the package file into memory. Objects from a
/// package carry no bytes since decoding is the host's job; objects from
/// loose files carry the file contents. Scene activation always succeeds.
#[derive(Debug, Default)]
pub struct FsBackend {
    packages: HashMap<String, Vec<u8>>,
    next_id: u64,
}

impl FsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Total bytes held by open packages
    pub fn resident_bytes(&self) -> usize {
        self.packages.values().map(Vec::len).sum()
    }

    fn next_object(&mut self, address: &str, bytes: Option<Vec<u8>>) -> LoadedObject {
        self.next_id += 1;
        LoadedObject {
            id: self.next_id,
            address: address.to_string(),
            kind: ObjectKind::for_address(address),
            bytes,
        }
    }
}

impl ContentBackend for FsBackend {
    fn poll_package(&mut self, name: &str, path: &Path) -> LoadPoll<()> {
        match fs::read(path) {
            Ok(bytes) => {
                log::debug!("Opened package '{}' ({} bytes)", name, bytes.len());
                self.packages.insert(name.to_string(), bytes);
                LoadPoll::Ready(())
            }
            Err(err) => LoadPoll::Failed(format!("cannot open {}: {}", path.display(), err)),
        }
    }

    fn poll_object(&mut self, source: ObjectSource<'_>, address: &str) -> LoadPoll<LoadedObject> {
        match source {
            ObjectSource::Package(package) => {
                if !self.is_open(package) {
                    return LoadPoll::Failed(format!("package '{}' is not open", package));
                }
                LoadPoll::Ready(self.next_object(address, None))
            }
            ObjectSource::File(path) => match fs::read(path) {
                Ok(bytes) => LoadPoll::Ready(self.next_object(address, Some(bytes))),
                Err(err) => LoadPoll::Failed(format!("cannot read {}: {}", path.display(), err)),
            },
        }
    }

    fn poll_scene(&mut self, _address: &str, _mode: SceneMode) -> LoadPoll<()> {
        LoadPoll::Ready(())
    }

    fn close_package(&mut self, name: &str) {
        if self.packages.remove(name).is_none() {
            log::warn!("Closing package '{}' that is not open", name);
        }
    }

    fn release_object(&mut self, _object: &LoadedObject) {}

    fn unload_scene(&mut self, _address: &str) {}

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Counters recorded by [`MemoryBackend`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub packages_opened: HashMap<String, usize>,
    pub packages_closed: HashMap<String, usize>,
    pub objects_loaded: usize,
    pub objects_released: usize,
    pub scenes_activated: Vec<String>,
    pub scenes_unloaded: Vec<String>,
}

impl BackendStats {
    pub fn opened(&self, package: &str) -> usize {
        self.packages_opened.get(package).copied().unwrap_or(0)
    }

    pub fn closed(&self, package: &str) -> usize {
        self.packages_closed.get(package).copied().unwrap_or(0)
    }
}

/// Scripted in-memory backend for tests and tooling.
///
/// Every operation takes `latency` polls before it completes. Packages are
/// registered by file name (`map_common_b1.pack`) with
/// [`MemoryBackend::with_package`] and must be opened before objects are
/// read from them.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    packages: HashSet<String>,
    files: HashSet<PathBuf>,
    failing: HashSet<String>,
    latency: u32,
    pending: HashMap<String, u32>,
    open: HashSet<String>,
    next_id: u64,
    stats: Rc<RefCell<BackendStats>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, polls: u32) -> Self {
        self.latency = polls;
        self
    }

    pub fn with_package(mut self, name: impl Into<String>) -> Self {
        self.packages.insert(name.into());
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.insert(path.into());
        self
    }

    /// Make every operation on `item` (package name or address) fail
    pub fn with_failure(mut self, item: impl Into<String>) -> Self {
        self.failing.insert(item.into());
        self
    }

    /// Shared view of the counters, still readable after the backend moves
    pub fn stats(&self) -> Rc<RefCell<BackendStats>> {
        Rc::clone(&self.stats)
    }

    pub fn is_open(&self, package: &str) -> bool {
        self.open.contains(package)
    }

    /// Count one poll of `key`; `Some(progress)` while it is still pending
    fn advance(&mut self, key: String) -> Option<f32> {
        if self.latency == 0 {
            return None;
        }
        let polls = self.pending.entry(key.clone()).or_insert(0);
        *polls += 1;
        if *polls > self.latency {
            self.pending.remove(&key);
            None
        } else {
            Some(*polls as f32 / (self.latency + 1) as f32)
        }
    }
}

impl ContentBackend for MemoryBackend {
    fn poll_package(&mut self, name: &str, _path: &Path) -> LoadPoll<()> {
        if !self.packages.contains(name) || self.failing.contains(name) {
            return LoadPoll::Failed(format!("package '{}' is not available", name));
        }
        if let Some(progress) = self.advance(format!("package:{}", name)) {
            return LoadPoll::Pending(progress);
        }
        self.open.insert(name.to_string());
        *self
            .stats
            .borrow_mut()
            .packages_opened
            .entry(name.to_string())
            .or_insert(0) += 1;
        LoadPoll::Ready(())
    }

    fn poll_object(&mut self, source: ObjectSource<'_>, address: &str) -> LoadPoll<LoadedObject> {
        if self.failing.contains(address) {
            return LoadPoll::Failed(format!("cannot deserialize '{}'", address));
        }
        match source {
            ObjectSource::Package(package) if !self.open.contains(package) => {
                return LoadPoll::Failed(format!("package '{}' is not open", package));
            }
            ObjectSource::File(path) if !self.files.contains(path) => {
                return LoadPoll::Failed(format!("cannot read {}", path.display()));
            }
            _ => {}
        }
        if let Some(progress) = self.advance(format!("object:{}", address)) {
            return LoadPoll::Pending(progress);
        }

        self.next_id += 1;
        self.stats.borrow_mut().objects_loaded += 1;
        LoadPoll::Ready(LoadedObject {
            id: self.next_id,
            address: address.to_string(),
            kind: ObjectKind::for_address(address),
            bytes: None,
        })
    }

    fn poll_scene(&mut self, address: &str, _mode: SceneMode) -> LoadPoll<()> {
        if self.failing.contains(address) {
            return LoadPoll::Failed(format!("cannot activate scene '{}'", address));
        }
        if let Some(progress) = self.advance(format!("scene:{}", address)) {
            return LoadPoll::Pending(progress);
        }
        self.stats
            .borrow_mut()
            .scenes_activated
            .push(address.to_string());
        LoadPoll::Ready(())
    }

    fn close_package(&mut self, name: &str) {
        self.open.remove(name);
        *self
            .stats
            .borrow_mut()
            .packages_closed
            .entry(name.to_string())
            .or_insert(0) += 1;
    }

    fn release_object(&mut self, _object: &LoadedObject) {
        self.stats.borrow_mut().objects_released += 1;
    }

    fn unload_scene(&mut self, address: &str) {
        self.stats
            .borrow_mut()
            .scenes_unloaded
            .push(address.to_string());
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains(path)
    }
}
