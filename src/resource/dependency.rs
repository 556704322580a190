//! Dependency loader
//!
//! Loads everything an address needs before its own object can be read:
//! the address's package, the packages of the addresses it references and
//! their declared package dependencies, transitively. Each package is a
//! cache-managed loadable of its own, so packages shared between dependency
//! sets load once.
//!
//! Composite resources additionally preload their material and texture
//! dependencies. Both walks keep a cursor and yield as soon as the frame
//! budget is spent.

use std::rc::Rc;

use super::backend::{LoadPoll, LoadedObject, ObjectKind, ObjectSource};
use super::engine::Engine;
use super::loadable::{Handle, Status, Step};
use super::manifest::Manifest;
use crate::config::{EngineConfig, LoadMode};

#[derive(Debug)]
pub struct DependencyLoad {
    pub address: String,
    pub mode: LoadMode,
    /// Preload material and texture dependencies as well
    pub preload_enabled: bool,
    packages: Vec<Handle>,
    package_cursor: usize,
    /// `(address, package file)` pairs to preload
    preload: Vec<(String, String)>,
    preload_cursor: usize,
    preloaded: Vec<LoadedObject>,
    manifest: Option<Rc<Manifest>>,
}

impl DependencyLoad {
    pub fn new(address: &str, mode: LoadMode, preload_enabled: bool) -> Self {
        Self {
            address: address.to_string(),
            mode,
            preload_enabled,
            packages: Vec::new(),
            package_cursor: 0,
            preload: Vec::new(),
            preload_cursor: 0,
            preloaded: Vec::new(),
            manifest: None,
        }
    }

    /// Handles of every package this set holds a reference on
    pub fn packages(&self) -> &[Handle] {
        &self.packages
    }

    /// Addresses selected for preloading
    pub fn preload_addresses(&self) -> impl Iterator<Item = &str> {
        self.preload.iter().map(|(address, _)| address.as_str())
    }

    pub fn preloaded(&self) -> &[LoadedObject] {
        &self.preloaded
    }

    fn total(&self) -> usize {
        self.packages.len() + self.preload.len()
    }

    fn completed(&self) -> usize {
        self.package_cursor + self.preload_cursor
    }

    fn report_progress(&self, engine: &mut Engine, id: Handle) {
        let total = self.total();
        if total > 0 {
            engine.set_progress(id, self.completed() as f32 / total as f32);
        }
    }
}

pub(crate) fn start(dep: &mut DependencyLoad, engine: &mut Engine, _id: Handle) -> Step {
    // Loose files have no packages
    if dep.mode == LoadMode::Direct {
        return Step::Continue;
    }

    let manifest = engine.manifest_rc();
    let Some(packages) = manifest.dependency_packages(&dep.address) else {
        log::error!(
            "Dependencies of '{}' requested, but it is not in manifest '{}'",
            dep.address,
            manifest.name()
        );
        return Step::fail(format!("'{}' not found in manifest", dep.address));
    };

    dep.manifest = Some(Rc::clone(&manifest));
    for name in &packages {
        let handle = engine.acquire_package(name);
        dep.packages.push(handle);
    }

    if dep.preload_enabled {
        select_preloads(dep, engine.config());
    }

    log::debug!(
        "Dependencies of '{}': {} packages, {} preloads",
        dep.address,
        dep.packages.len(),
        dep.preload.len()
    );
    Step::Continue
}

/// Queue the preload candidates among the transitive dependencies of
/// `dep.address`. Safe to call again on a set that is still loading.
pub(crate) fn select_preloads(dep: &mut DependencyLoad, config: &EngineConfig) {
    dep.preload_enabled = true;
    // Resolve against the manifest the packages came from
    let Some(manifest) = dep.manifest.clone() else {
        return;
    };
    for entry in manifest.dependency_assets(&dep.address) {
        let selected = dep.preload.iter().any(|(address, _)| *address == entry.address);
        if selected || !config.is_preload_candidate(&entry.address) {
            continue;
        }
        if let Some(file_name) = manifest.package_file_name(&entry.package) {
            dep.preload.push((entry.address.clone(), file_name));
        }
    }
}

pub(crate) fn update(
    dep: &mut DependencyLoad,
    engine: &mut Engine,
    id: Handle,
    immediate: bool,
) -> Step {
    while dep.package_cursor < dep.packages.len() {
        let package = dep.packages[dep.package_cursor];

        if !engine.is_terminal(package) {
            if immediate {
                engine.load_immediately(package);
            } else {
                if engine.is_busy() {
                    break;
                }
                engine.tick(package);
            }
        }

        match engine.status(package) {
            Some(Status::Done) => dep.package_cursor += 1,
            Some(Status::Error) => {
                let reason = engine.error(package).unwrap_or("unknown error").to_string();
                return Step::fail(format!(
                    "dependency of '{}' failed: {}",
                    dep.address, reason
                ));
            }
            Some(_) => break,
            None => {
                return Step::fail(format!(
                    "dependency package of '{}' disappeared",
                    dep.address
                ))
            }
        }
    }

    if dep.package_cursor < dep.packages.len() {
        dep.report_progress(engine, id);
        return Step::Continue;
    }

    while dep.preload_cursor < dep.preload.len() {
        if !immediate && engine.is_busy() {
            break;
        }

        let (address, package) = &dep.preload[dep.preload_cursor];
        let source = ObjectSource::Package(package);
        let poll = if immediate {
            match engine.backend_mut().load_object_now(source, address) {
                Ok(object) => LoadPoll::Ready(object),
                Err(err) => LoadPoll::Failed(err),
            }
        } else {
            engine.consume_budget(1);
            engine.backend_mut().poll_object(source, address)
        };

        match poll {
            LoadPoll::Pending(_) => break,
            LoadPoll::Ready(object) => {
                dep.preloaded.push(object);
                dep.preload_cursor += 1;
            }
            LoadPoll::Failed(err) => {
                // Preloading is a warm-up; the dependent still loads lazily
                log::warn!("Preload of '{}' for '{}' failed: {}", address, dep.address, err);
                dep.preload_cursor += 1;
            }
        }
    }

    if dep.preload_cursor < dep.preload.len() {
        dep.report_progress(engine, id);
        return Step::Continue;
    }

    Step::done()
}

pub(crate) fn unload(dep: DependencyLoad, engine: &mut Engine) {
    for object in &dep.preloaded {
        if object.kind == ObjectKind::Data {
            engine.backend_mut().release_object(object);
        }
    }
    for package in dep.packages {
        engine.release(package);
    }
}
