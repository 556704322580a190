//! Loading engine
//!
//! [`Engine`] is the explicit context that owns the manifest, the backend,
//! the loadable arena, the reference-counted cache and the scheduler.
//! Nothing is global, so independent engines can live side by side.
//!
//! # Frame model
//! The host calls [`Engine::update`] once per frame. Every in-flight
//! loadable is ticked once, in registration order, until the frame budget
//! runs out; work that does not fit resumes next frame. Completion
//! callbacks run in the frame the loadable finishes.
//!
//! # Lifetime
//! `acquire_*` returns a shared handle and adds a reference; [`Engine::release`]
//! drops one. At zero references a finished loadable is unloaded at once,
//! an in-flight one runs to completion first and is unloaded right after.

use std::fmt;
use std::path::Path;
use std::rc::Rc;

use slotmap::SlotMap;

use super::backend::{ContentBackend, LoadedObject, SceneMode};
use super::cache::{ReleaseOutcome, ResourceCache};
use super::dependency;
use super::factory::LoaderFactories;
use super::loadable::{
    CacheKey, Completion, Handle, KindTag, Loadable, LoadableKind, Status, Step,
};
use super::manifest::Manifest;
use super::scheduler::{Budget, Scheduler};
use crate::config::EngineConfig;

pub struct Engine {
    config: EngineConfig,
    manifest: Rc<Manifest>,
    backend: Box<dyn ContentBackend>,
    factories: LoaderFactories,
    slots: SlotMap<Handle, Loadable>,
    cache: ResourceCache,
    scheduler: Scheduler,
    active_scene: Option<String>,
    /// Nesting depth of `load_immediately`; the budget is ignored while > 0
    immediate_depth: usize,
}

impl Engine {
    /// Create an engine; loader factories follow `config.load_mode`
    pub fn new(config: EngineConfig, manifest: Manifest, backend: Box<dyn ContentBackend>) -> Self {
        let factories = LoaderFactories::for_mode(config.load_mode);
        let budget = Budget::new(config.time_slice, config.max_items_per_frame);
        log::debug!(
            "Engine created: manifest '{}' v{}, {:?} mode",
            manifest.name(),
            manifest.version(),
            config.load_mode
        );
        Self {
            config,
            manifest: Rc::new(manifest),
            backend,
            factories,
            slots: SlotMap::with_key(),
            cache: ResourceCache::new(),
            scheduler: Scheduler::new(budget),
            active_scene: None,
            immediate_depth: 0,
        }
    }

    /// Replace the loader factories
    pub fn with_factories(mut self, factories: LoaderFactories) -> Self {
        self.factories = factories;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub(crate) fn manifest_rc(&self) -> Rc<Manifest> {
        Rc::clone(&self.manifest)
    }

    /// Activate a new content version. Live loadables keep what they
    /// resolved; new requests resolve against `manifest`.
    pub fn swap_manifest(&mut self, manifest: Manifest) {
        log::info!(
            "Manifest '{}' v{} replaced by '{}' v{}",
            self.manifest.name(),
            self.manifest.version(),
            manifest.name(),
            manifest.version()
        );
        self.manifest = Rc::new(manifest);
    }

    pub fn set_budget(&mut self, budget: Budget) {
        self.scheduler.set_budget(budget);
    }

    // -----------------------------------------------------------------------
    // Acquisition
    // -----------------------------------------------------------------------

    /// Acquire the object stored at `address`
    pub fn acquire_asset(&mut self, address: &str) -> Handle {
        let factory = self.factories.asset;
        self.acquire(CacheKey::new(KindTag::Asset, address), |config| {
            factory(config, address)
        })
    }

    /// Acquire the on-disk location of a file shipped as-is
    pub fn acquire_raw_file(&mut self, address: &str) -> Handle {
        let factory = self.factories.raw_file;
        self.acquire(CacheKey::new(KindTag::RawFile, address), |config| {
            factory(config, address)
        })
    }

    /// Acquire and activate a scene
    pub fn acquire_scene(&mut self, address: &str, mode: SceneMode) -> Handle {
        let factory = self.factories.scene;
        self.acquire(CacheKey::new(KindTag::Scene, address), |config| {
            factory(config, address, mode)
        })
    }

    /// Acquire every package `address` needs, without preloading
    pub fn acquire_dependencies(&mut self, address: &str) -> Handle {
        self.acquire_dependencies_with(address, false)
    }

    /// Acquire every package `address` needs; `preload` also warms up its
    /// material and texture dependencies
    ///
    /// A shared set that is still loading picks up preloading when a
    /// preloading requester arrives; a finished one is left as it is.
    pub fn acquire_dependencies_with(&mut self, address: &str, preload: bool) -> Handle {
        let factory = self.factories.dependency;
        let handle = self.acquire(CacheKey::new(KindTag::Dependency, address), |config| {
            factory(config, address, preload)
        });
        if preload {
            self.enable_preload(handle);
        }
        handle
    }

    fn enable_preload(&mut self, id: Handle) {
        let Some(loadable) = self.slots.get_mut(id) else {
            return;
        };
        let terminal = loadable.state.is_terminal();
        let Some(LoadableKind::Dependency(dep)) = loadable.kind.as_mut() else {
            return;
        };
        if dep.preload_enabled {
            return;
        }
        if terminal {
            log::warn!(
                "{} finished without preloading; preload request ignored",
                loadable.key
            );
            return;
        }
        log::debug!("Preloading enabled for shared {}", loadable.key);
        dependency::select_preloads(dep, &self.config);
    }

    /// Packages are cached under their content-addressed file name, so a
    /// manifest swap that changes a hash opens the new file while holders
    /// of the old one keep it.
    pub(crate) fn acquire_package(&mut self, name: &str) -> Handle {
        let file_name = self
            .manifest
            .package_file_name(name)
            .unwrap_or_else(|| name.to_string());
        let factory = self.factories.package;
        self.acquire(CacheKey::new(KindTag::Package, file_name), |config| {
            factory(config, name)
        })
    }

    fn acquire(
        &mut self,
        key: CacheKey,
        make: impl FnOnce(&EngineConfig) -> LoadableKind,
    ) -> Handle {
        if let Some(handle) = self.cache.add_ref(&key) {
            log::debug!("Sharing {} (refs {})", key, self.cache.ref_count(&key));
            return handle;
        }

        let kind = make(&self.config);
        let handle = self.slots.insert(Loadable::new(key.clone(), kind));
        log::debug!("Loading {}", key);
        self.cache.insert(key, handle);
        self.start(handle);
        handle
    }

    /// `Idle -> Loading`, register, run the start hook
    fn start(&mut self, id: Handle) {
        let Some(loadable) = self.slots.get_mut(id) else {
            return;
        };
        if loadable.state.status() != Status::Idle {
            log::warn!(
                "Load requested for {} which is already {}",
                loadable.key,
                loadable.state.status()
            );
            return;
        }
        loadable.state.transition(Status::Loading);
        self.scheduler.register(id);

        let step = self.run_hook(id, |kind, engine| kind.start(engine, id));
        self.apply(id, step);
    }

    /// Drop one reference to `handle`
    pub fn release(&mut self, handle: Handle) {
        let Some(loadable) = self.slots.get(handle) else {
            log::warn!("Releasing unknown or unloaded handle {:?}", handle);
            return;
        };
        let key = loadable.key.clone();
        let terminal = loadable.state.is_terminal();

        match self.cache.release(&key) {
            ReleaseOutcome::Unknown => {
                log::warn!("Releasing {} which has no cache entry", key);
            }
            ReleaseOutcome::OverRelease => {
                log::warn!("Releasing an unreferenced resource {}", key);
            }
            ReleaseOutcome::Alive(refs) => {
                log::debug!("Released {} (refs {})", key, refs);
            }
            ReleaseOutcome::Unused(_) if terminal => self.teardown(handle),
            ReleaseOutcome::Unused(_) => {
                log::debug!("{} released while loading; unloading once finished", key);
            }
        }
    }

    /// Unload a terminal, unreferenced loadable unless the usage table
    /// still needs it
    fn teardown(&mut self, id: Handle) {
        let Some(loadable) = self.slots.get(id) else {
            return;
        };
        let key = loadable.key.clone();

        if self.cache.usage().is_in_use(&key) {
            log::debug!(
                "{} unreferenced but used by {} scene objects; parked",
                key,
                self.cache.usage().consumers(&key)
            );
            self.cache.park(&key);
            return;
        }

        self.cache.remove(&key);
        self.scheduler.deregister(id);
        if let Some(loadable) = self.slots.remove(id) {
            log::debug!("Unloading {}", loadable.key);
            if let Some(kind) = loadable.kind {
                kind.unload(self);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// Run one frame: tick every in-flight loadable once
    pub fn update(&mut self) {
        self.scheduler.begin_frame();

        // Loadables registered during the walk are ticked this frame too
        let mut index = 0;
        while let Some(slot) = self.scheduler.get(index) {
            index += 1;
            if let Some(handle) = slot {
                self.tick(handle);
            }
        }

        self.scheduler.compact();
    }

    /// Tick `id` unless it already ran this frame
    pub(crate) fn tick(&mut self, id: Handle) {
        let frame = self.scheduler.frame();
        let Some(loadable) = self.slots.get_mut(id) else {
            return;
        };
        if loadable.state.is_terminal() || loadable.state.last_tick == Some(frame) {
            return;
        }
        loadable.state.last_tick = Some(frame);
        self.step(id, false);
    }

    fn step(&mut self, id: Handle, immediate: bool) {
        let step = self.run_hook(id, |kind, engine| kind.update(engine, id, immediate));
        self.apply(id, step);
    }

    /// Run a hook with the kind data taken out of the arena
    fn run_hook(
        &mut self,
        id: Handle,
        hook: impl FnOnce(&mut LoadableKind, &mut Engine) -> Step,
    ) -> Step {
        let Some(mut kind) = self.slots.get_mut(id).and_then(|l| l.kind.take()) else {
            log::warn!("Loadable {:?} re-entered while its hook is running", id);
            return Step::Continue;
        };

        let step = hook(&mut kind, self);

        match self.slots.get_mut(id) {
            Some(loadable) => loadable.kind = Some(kind),
            None => kind.unload(self),
        }
        step
    }

    fn apply(&mut self, id: Handle, step: Step) {
        if let Step::Finish(error) = step {
            self.finish(id, error);
        }
    }

    /// Enter the terminal state, fire callbacks, tear down if unreferenced
    fn finish(&mut self, id: Handle, error: Option<String>) {
        let Some(loadable) = self.slots.get_mut(id) else {
            return;
        };
        let Some(callbacks) = loadable.state.finish(error) else {
            return;
        };

        let key = loadable.key.clone();
        let completion = Completion {
            handle: id,
            address: key.address.clone(),
            status: loadable.state.status(),
            error: loadable.state.error().map(str::to_string),
        };
        match &completion.error {
            Some(err) => log::warn!("{} failed: {}", key, err),
            None => log::debug!("{} done", key),
        }

        self.scheduler.deregister(id);
        for callback in callbacks {
            callback(&completion);
        }

        let unreferenced = self
            .cache
            .get(&key)
            .is_some_and(|entry| entry.handle == id && entry.ref_count() == 0);
        if unreferenced {
            self.teardown(id);
        }
    }

    /// Finish `handle` now, ignoring the frame budget.
    ///
    /// Leaves the same final state and fires the same callbacks as the
    /// frame-driven path.
    pub fn load_immediately(&mut self, handle: Handle) {
        let Some(loadable) = self.slots.get(handle) else {
            log::warn!("Immediate load of unknown handle {:?}", handle);
            return;
        };
        if loadable.state.is_terminal() {
            return;
        }
        if loadable.kind.is_none() {
            log::warn!("Immediate load of {} from inside its own hook", loadable.key);
            return;
        }
        let key = loadable.key.clone();
        let idle = loadable.state.status() == Status::Idle;

        self.immediate_depth += 1;
        if idle {
            self.start(handle);
        }
        if !self.is_terminal(handle) {
            self.step(handle, true);
        }
        if self.slots.contains_key(handle) && !self.is_terminal(handle) {
            self.finish(
                handle,
                Some(format!("{} did not complete synchronously", key)),
            );
        }
        self.immediate_depth -= 1;
    }

    /// Run `callback` when `handle` finishes, or now if it already has
    pub fn on_complete(&mut self, handle: Handle, callback: impl FnOnce(&Completion) + 'static) {
        let Some(loadable) = self.slots.get_mut(handle) else {
            log::warn!("Completion callback on unknown handle {:?}", handle);
            return;
        };
        if loadable.state.is_terminal() {
            let completion = Completion {
                handle,
                address: loadable.key.address.clone(),
                status: loadable.state.status(),
                error: loadable.state.error().map(str::to_string),
            };
            callback(&completion);
        } else {
            loadable.state.push_callback(Box::new(callback));
        }
    }

    // -----------------------------------------------------------------------
    // Hook services
    // -----------------------------------------------------------------------

    /// True once the frame budget is spent; never during immediate loads
    pub fn is_busy(&self) -> bool {
        self.immediate_depth == 0 && self.scheduler.is_busy()
    }

    pub(crate) fn consume_budget(&mut self, items: usize) {
        self.scheduler.consume(items);
    }

    pub(crate) fn backend_mut(&mut self) -> &mut dyn ContentBackend {
        self.backend.as_mut()
    }

    pub(crate) fn set_status(&mut self, id: Handle, status: Status) {
        if let Some(loadable) = self.slots.get_mut(id) {
            loadable.state.transition(status);
        }
    }

    pub(crate) fn set_progress(&mut self, id: Handle, progress: f32) {
        if let Some(loadable) = self.slots.get_mut(id) {
            loadable.state.set_progress(progress);
        }
    }

    pub(crate) fn set_active_scene(&mut self, scene: Option<String>) {
        self.active_scene = scene;
    }

    /// Keep the packages of dependency set `dependency` alive for `consumer`
    pub(crate) fn mark_packages_in_use(&mut self, dependency: Handle, consumer: u64) {
        let keys: Vec<CacheKey> = match self.slots.get(dependency).and_then(Loadable::kind) {
            Some(LoadableKind::Dependency(dep)) => dep
                .packages()
                .iter()
                .filter_map(|package| self.slots.get(*package))
                .map(|loadable| loadable.key.clone())
                .collect(),
            _ => return,
        };
        for key in keys {
            self.cache.usage_mut().mark(key, consumer);
        }
    }

    /// The host destroyed scene object `object_id`; unload package data
    /// that was only kept for it
    pub fn object_destroyed(&mut self, object_id: u64) {
        for key in self.cache.usage_mut().clear_consumer(object_id) {
            let Some(entry) = self.cache.get(&key) else {
                continue;
            };
            if entry.ref_count() == 0 && entry.is_parked() {
                let handle = entry.handle;
                log::debug!("{} no longer used by scene objects", key);
                self.teardown(handle);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn status(&self, handle: Handle) -> Option<Status> {
        self.slots.get(handle).map(|l| l.state.status())
    }

    pub fn is_done(&self, handle: Handle) -> bool {
        self.status(handle) == Some(Status::Done)
    }

    pub fn has_error(&self, handle: Handle) -> bool {
        self.status(handle) == Some(Status::Error)
    }

    pub fn is_terminal(&self, handle: Handle) -> bool {
        self.status(handle).is_some_and(Status::is_terminal)
    }

    /// Overall progress in 0..=1; 0 for unknown handles
    pub fn progress(&self, handle: Handle) -> f32 {
        self.slots.get(handle).map_or(0.0, |l| l.state.progress())
    }

    pub fn error(&self, handle: Handle) -> Option<&str> {
        self.slots.get(handle).and_then(|l| l.state.error())
    }

    /// Address (or package name) a handle was acquired for
    pub fn address(&self, handle: Handle) -> Option<&str> {
        self.slots.get(handle).map(|l| l.key.address.as_str())
    }

    /// The materialized object of a finished asset
    pub fn object(&self, handle: Handle) -> Option<&LoadedObject> {
        match self.slots.get(handle)?.kind()? {
            LoadableKind::Asset(asset) => asset.object(),
            _ => None,
        }
    }

    /// Resolved path of a raw file that was found
    pub fn raw_file_path(&self, handle: Handle) -> Option<&Path> {
        let loadable = self.slots.get(handle)?;
        if loadable.state.status() != Status::Done {
            return None;
        }
        match loadable.kind()? {
            LoadableKind::RawFile(raw) => raw.path().map(|p| p.as_path()),
            _ => None,
        }
    }

    /// Live reference count of a cache key; 0 when not cached
    pub fn reference_count(&self, kind: KindTag, address: &str) -> usize {
        self.cache.ref_count(&CacheKey::new(kind, address))
    }

    /// Whether a cache entry exists for the key (referenced or parked)
    pub fn is_cached(&self, kind: KindTag, address: &str) -> bool {
        self.cache.contains(&CacheKey::new(kind, address))
    }

    /// Handle of the live loadable for a key, without adding a reference
    pub fn lookup(&self, kind: KindTag, address: &str) -> Option<Handle> {
        self.cache
            .get(&CacheKey::new(kind, address))
            .map(|entry| entry.handle)
    }

    pub fn active_scene(&self) -> Option<&str> {
        self.active_scene.as_deref()
    }

    pub fn frame(&self) -> u64 {
        self.scheduler.frame()
    }

    /// Live loadables that finished successfully
    pub fn loaded_count(&self) -> usize {
        self.slots
            .values()
            .filter(|l| l.state.status() == Status::Done)
            .count()
    }

    /// Loadables still being ticked
    pub fn in_flight_count(&self) -> usize {
        self.scheduler.len()
    }

    /// All live loadables, including failed and parked ones
    pub fn live_count(&self) -> usize {
        self.slots.len()
    }

    pub fn parked_count(&self) -> usize {
        self.cache.parked()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("manifest", &self.manifest.name())
            .field("version", &self.manifest.version())
            .field("factories", &self.factories)
            .field("live", &self.slots.len())
            .field("in_flight", &self.scheduler.len())
            .field("frame", &self.scheduler.frame())
            .field("active_scene", &self.active_scene)
            .finish()
    }
}
