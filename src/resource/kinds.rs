//! Kind-specific hooks
//!
//! The engine owns the state machine; this module supplies what differs per
//! kind. Every hook receives the engine with the loadable's own kind data
//! taken out, so a hook may freely acquire, tick and release other
//! loadables.

use std::path::PathBuf;

use super::backend::{LoadPoll, LoadedObject, ObjectKind, ObjectSource, SceneMode};
use super::dependency;
use super::engine::Engine;
use super::loadable::{Handle, LoadableKind, Status, Step};
use crate::config::LoadMode;

impl LoadableKind {
    /// Runs once, right after the loadable enters `Loading`
    pub(crate) fn start(&mut self, engine: &mut Engine, id: Handle) -> Step {
        match self {
            LoadableKind::Asset(asset) => start_asset(asset, engine, id),
            LoadableKind::RawFile(raw) => start_raw_file(raw, engine),
            LoadableKind::Scene(scene) => start_scene(scene, engine, id),
            LoadableKind::Dependency(dep) => dependency::start(dep, engine, id),
            LoadableKind::Package(package) => start_package(package, engine),
        }
    }

    /// Runs once per tick until a `Step::Finish` is returned
    pub(crate) fn update(&mut self, engine: &mut Engine, id: Handle, immediate: bool) -> Step {
        match self {
            LoadableKind::Asset(asset) => update_asset(asset, engine, id, immediate),
            LoadableKind::RawFile(raw) => update_raw_file(raw, engine),
            LoadableKind::Scene(scene) => update_scene(scene, engine, id, immediate),
            LoadableKind::Dependency(dep) => dependency::update(dep, engine, id, immediate),
            LoadableKind::Package(package) => update_package(package, engine, id, immediate),
        }
    }

    /// Frees whatever the loadable holds. Runs after the cache entry is gone.
    pub(crate) fn unload(self, engine: &mut Engine) {
        match self {
            LoadableKind::Asset(asset) => unload_asset(asset, engine),
            LoadableKind::RawFile(_) => {}
            LoadableKind::Scene(scene) => unload_scene(scene, engine),
            LoadableKind::Dependency(dep) => dependency::unload(dep, engine),
            LoadableKind::Package(package) => unload_package(package, engine),
        }
    }
}

/// Result of waiting on a dependency set
enum DependencyWait {
    Ready,
    Pending,
    Failed(Step),
}

/// Shared dependency phase of assets and scenes.
///
/// Reports `weight * dependency_progress` while the set loads and moves the
/// owner back to `Loading` once it is done.
fn wait_for_dependency(
    engine: &mut Engine,
    id: Handle,
    address: &str,
    dependency: Option<Handle>,
    weight: f32,
    immediate: bool,
) -> DependencyWait {
    let Some(dep) = dependency else {
        return DependencyWait::Ready;
    };

    if immediate && !engine.is_terminal(dep) {
        engine.load_immediately(dep);
    }

    match engine.status(dep) {
        Some(Status::Done) => {
            engine.set_status(id, Status::Loading);
            engine.set_progress(id, weight);
            DependencyWait::Ready
        }
        Some(Status::Error) => {
            let reason = engine.error(dep).unwrap_or("unknown error").to_string();
            DependencyWait::Failed(Step::fail(format!(
                "dependencies of '{}' failed: {}",
                address, reason
            )))
        }
        Some(_) => {
            let progress = engine.progress(dep);
            engine.set_progress(id, weight * progress);
            DependencyWait::Pending
        }
        None => DependencyWait::Failed(Step::fail(format!(
            "dependencies of '{}' were released while loading",
            address
        ))),
    }
}

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

/// A deserialized object resolved through the manifest
#[derive(Debug)]
pub struct AssetLoad {
    pub address: String,
    pub mode: LoadMode,
    /// Share of progress given to the dependency phase
    pub weight: f32,
    /// Loose file backing the asset in direct mode
    pub path: Option<PathBuf>,
    package: Option<String>,
    dependency: Option<Handle>,
    object: Option<LoadedObject>,
}

impl AssetLoad {
    pub fn packaged(address: &str, weight: f32) -> Self {
        Self {
            address: address.to_string(),
            mode: LoadMode::Packaged,
            weight,
            path: None,
            package: None,
            dependency: None,
            object: None,
        }
    }

    pub fn direct(address: &str, path: PathBuf) -> Self {
        Self {
            address: address.to_string(),
            mode: LoadMode::Direct,
            weight: 0.0,
            path: Some(path),
            package: None,
            dependency: None,
            object: None,
        }
    }

    pub fn object(&self) -> Option<&LoadedObject> {
        self.object.as_ref()
    }

    pub fn dependency(&self) -> Option<Handle> {
        self.dependency
    }
}

fn start_asset(asset: &mut AssetLoad, engine: &mut Engine, id: Handle) -> Step {
    if asset.mode == LoadMode::Direct {
        return Step::Continue;
    }

    let manifest = engine.manifest_rc();
    let Some(entry) = manifest.asset(&asset.address) else {
        log::error!("Asset '{}' is not in manifest '{}'", asset.address, manifest.name());
        return Step::fail(format!("'{}' not found in manifest", asset.address));
    };
    // Objects are read from the content-addressed package file
    asset.package = manifest.package_file_name(&entry.package);

    let preload = ObjectKind::for_address(&asset.address) == ObjectKind::SceneNode;
    asset.dependency = Some(engine.acquire_dependencies_with(&asset.address, preload));
    engine.set_status(id, Status::DependentLoading);
    Step::Continue
}

fn update_asset(asset: &mut AssetLoad, engine: &mut Engine, id: Handle, immediate: bool) -> Step {
    match wait_for_dependency(engine, id, &asset.address, asset.dependency, asset.weight, immediate) {
        DependencyWait::Ready => {}
        DependencyWait::Pending => return Step::Continue,
        DependencyWait::Failed(step) => return step,
    }

    let source = match (&asset.package, &asset.path) {
        (Some(package), _) => ObjectSource::Package(package),
        (None, Some(path)) => ObjectSource::File(path),
        (None, None) => return Step::fail(format!("'{}' has no source", asset.address)),
    };

    let poll = if immediate {
        match engine.backend_mut().load_object_now(source, &asset.address) {
            Ok(object) => LoadPoll::Ready(object),
            Err(err) => LoadPoll::Failed(err),
        }
    } else {
        engine.backend_mut().poll_object(source, &asset.address)
    };

    match poll {
        LoadPoll::Pending(progress) => {
            engine.set_progress(id, asset.weight + (1.0 - asset.weight) * progress);
            Step::Continue
        }
        LoadPoll::Ready(object) => {
            if object.kind == ObjectKind::SceneNode {
                if let Some(dep) = asset.dependency {
                    engine.mark_packages_in_use(dep, object.id);
                }
            }
            log::debug!("Asset '{}' loaded as object {}", asset.address, object.id);
            asset.object = Some(object);
            Step::done()
        }
        LoadPoll::Failed(err) => Step::fail(format!("failed to load '{}': {}", asset.address, err)),
    }
}

fn unload_asset(asset: AssetLoad, engine: &mut Engine) {
    if let Some(object) = &asset.object {
        // Scene-graph nodes belong to the host
        if object.kind == ObjectKind::Data {
            engine.backend_mut().release_object(object);
        }
    }
    if let Some(dep) = asset.dependency {
        engine.release(dep);
    }
}

// ---------------------------------------------------------------------------
// Raw file
// ---------------------------------------------------------------------------

/// A file used as-is, only located and checked for existence
#[derive(Debug)]
pub struct RawFileLoad {
    pub address: String,
    pub mode: LoadMode,
    path: Option<PathBuf>,
}

impl RawFileLoad {
    pub fn packaged(address: &str) -> Self {
        Self {
            address: address.to_string(),
            mode: LoadMode::Packaged,
            path: None,
        }
    }

    pub fn direct(address: &str, path: PathBuf) -> Self {
        Self {
            address: address.to_string(),
            mode: LoadMode::Direct,
            path: Some(path),
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

fn start_raw_file(raw: &mut RawFileLoad, engine: &mut Engine) -> Step {
    if raw.path.is_some() {
        return Step::Continue;
    }

    let manifest = engine.manifest_rc();
    let file_name = manifest
        .asset(&raw.address)
        .and_then(|entry| manifest.package_file_name(&entry.package));
    match file_name {
        Some(file_name) => {
            raw.path = Some(engine.config().build_dir.join(file_name));
            Step::Continue
        }
        None => {
            log::error!("Raw file '{}' is not in manifest '{}'", raw.address, manifest.name());
            Step::fail(format!("'{}' not found in manifest", raw.address))
        }
    }
}

fn update_raw_file(raw: &mut RawFileLoad, engine: &mut Engine) -> Step {
    let Some(path) = &raw.path else {
        return Step::fail(format!("'{}' has no path", raw.address));
    };
    if engine.backend_mut().exists(path) {
        Step::done()
    } else {
        Step::fail(format!("file not found: {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

/// A scene activated after its dependency set is loaded
#[derive(Debug)]
pub struct SceneLoad {
    pub address: String,
    pub mode: SceneMode,
    pub load_mode: LoadMode,
    pub weight: f32,
    dependency: Option<Handle>,
    activated: bool,
}

impl SceneLoad {
    pub fn packaged(address: &str, mode: SceneMode, weight: f32) -> Self {
        Self {
            address: address.to_string(),
            mode,
            load_mode: LoadMode::Packaged,
            weight,
            dependency: None,
            activated: false,
        }
    }

    pub fn direct(address: &str, mode: SceneMode) -> Self {
        Self {
            address: address.to_string(),
            mode,
            load_mode: LoadMode::Direct,
            weight: 0.0,
            dependency: None,
            activated: false,
        }
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }
}

fn start_scene(scene: &mut SceneLoad, engine: &mut Engine, id: Handle) -> Step {
    if scene.load_mode == LoadMode::Direct {
        return Step::Continue;
    }

    if !engine.manifest_rc().contains(&scene.address) {
        log::error!("Scene '{}' is not in the manifest", scene.address);
        return Step::fail(format!("'{}' not found in manifest", scene.address));
    }

    scene.dependency = Some(engine.acquire_dependencies_with(&scene.address, true));
    engine.set_status(id, Status::DependentLoading);
    Step::Continue
}

fn update_scene(scene: &mut SceneLoad, engine: &mut Engine, id: Handle, immediate: bool) -> Step {
    match wait_for_dependency(engine, id, &scene.address, scene.dependency, scene.weight, immediate) {
        DependencyWait::Ready => {}
        DependencyWait::Pending => return Step::Continue,
        DependencyWait::Failed(step) => return step,
    }

    let poll = if immediate {
        match engine.backend_mut().activate_scene_now(&scene.address, scene.mode) {
            Ok(()) => LoadPoll::Ready(()),
            Err(err) => LoadPoll::Failed(err),
        }
    } else {
        engine.backend_mut().poll_scene(&scene.address, scene.mode)
    };

    match poll {
        LoadPoll::Pending(progress) => {
            engine.set_progress(id, scene.weight + (1.0 - scene.weight) * progress);
            Step::Continue
        }
        LoadPoll::Ready(()) => {
            scene.activated = true;
            if scene.mode == SceneMode::Single {
                engine.set_active_scene(Some(scene.address.clone()));
            }
            log::info!("Scene '{}' activated ({:?})", scene.address, scene.mode);
            Step::done()
        }
        LoadPoll::Failed(err) => Step::fail(format!(
            "failed to activate scene '{}': {}",
            scene.address, err
        )),
    }
}

fn unload_scene(scene: SceneLoad, engine: &mut Engine) {
    if scene.activated {
        engine.backend_mut().unload_scene(&scene.address);
        if engine.active_scene() == Some(scene.address.as_str()) {
            engine.set_active_scene(None);
        }
    }
    if let Some(dep) = scene.dependency {
        engine.release(dep);
    }
}

// ---------------------------------------------------------------------------
// Package
// ---------------------------------------------------------------------------

/// One content package file, shared by every dependency set that needs it.
///
/// The backend knows the package by its content-addressed file name, so
/// two versions of the same logical package can be open side by side.
#[derive(Debug)]
pub struct PackageLoad {
    pub name: String,
    file_name: Option<String>,
    path: Option<PathBuf>,
    opened: bool,
}

impl PackageLoad {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            file_name: None,
            path: None,
            opened: false,
        }
    }

    /// `<name>_<hash>.<ext>` once resolved
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }
}

fn start_package(package: &mut PackageLoad, engine: &mut Engine) -> Step {
    match engine.manifest_rc().package_file_name(&package.name) {
        Some(file_name) => {
            package.path = Some(engine.config().build_dir.join(&file_name));
            package.file_name = Some(file_name);
            Step::Continue
        }
        None => Step::fail(format!("package '{}' not found in manifest", package.name)),
    }
}

fn update_package(
    package: &mut PackageLoad,
    engine: &mut Engine,
    id: Handle,
    immediate: bool,
) -> Step {
    let (Some(file_name), Some(path)) = (package.file_name.clone(), package.path.clone()) else {
        return Step::fail(format!("package '{}' has no path", package.name));
    };

    let poll = if immediate {
        match engine.backend_mut().open_package_now(&file_name, &path) {
            Ok(()) => LoadPoll::Ready(()),
            Err(err) => LoadPoll::Failed(err),
        }
    } else {
        if engine.is_busy() {
            return Step::Continue;
        }
        engine.consume_budget(1);
        engine.backend_mut().poll_package(&file_name, &path)
    };

    match poll {
        LoadPoll::Pending(progress) => {
            engine.set_progress(id, progress);
            Step::Continue
        }
        LoadPoll::Ready(()) => {
            package.opened = true;
            log::debug!("Package '{}' open from {}", package.name, path.display());
            Step::done()
        }
        LoadPoll::Failed(err) => Step::fail(format!("package '{}': {}", package.name, err)),
    }
}

fn unload_package(package: PackageLoad, engine: &mut Engine) {
    if let (true, Some(file_name)) = (package.opened, &package.file_name) {
        log::debug!("Closing package '{}' ({})", package.name, file_name);
        engine.backend_mut().close_package(file_name);
    }
}
