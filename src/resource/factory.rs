// Loader factories
//
// One constructor per resource kind, chosen once from the load mode.
// Packaged loaders resolve through the manifest; direct loaders read loose
// files from the source directory and skip packages entirely.

use super::backend::SceneMode;
use super::dependency::DependencyLoad;
use super::kinds::{AssetLoad, PackageLoad, RawFileLoad, SceneLoad};
use super::loadable::LoadableKind;
use crate::config::{EngineConfig, LoadMode};

pub type AssetFactory = fn(&EngineConfig, &str) -> LoadableKind;
pub type RawFileFactory = fn(&EngineConfig, &str) -> LoadableKind;
pub type SceneFactory = fn(&EngineConfig, &str, SceneMode) -> LoadableKind;
pub type DependencyFactory = fn(&EngineConfig, &str, bool) -> LoadableKind;
pub type PackageFactory = fn(&EngineConfig, &str) -> LoadableKind;

/// The constructor set an engine creates loadables with
#[derive(Clone, Copy)]
pub struct LoaderFactories {
    pub mode: LoadMode,
    pub asset: AssetFactory,
    pub raw_file: RawFileFactory,
    pub scene: SceneFactory,
    pub dependency: DependencyFactory,
    pub package: PackageFactory,
}

impl LoaderFactories {
    pub fn for_mode(mode: LoadMode) -> Self {
        match mode {
            LoadMode::Packaged => Self::packaged(),
            LoadMode::Direct => Self::direct(),
        }
    }

    pub fn packaged() -> Self {
        Self {
            mode: LoadMode::Packaged,
            asset: packaged_asset,
            raw_file: packaged_raw_file,
            scene: packaged_scene,
            dependency: packaged_dependency,
            package: content_package,
        }
    }

    pub fn direct() -> Self {
        Self {
            mode: LoadMode::Direct,
            asset: direct_asset,
            raw_file: direct_raw_file,
            scene: direct_scene,
            dependency: direct_dependency,
            package: content_package,
        }
    }

    pub fn with_asset(mut self, factory: AssetFactory) -> Self {
        self.asset = factory;
        self
    }

    pub fn with_raw_file(mut self, factory: RawFileFactory) -> Self {
        self.raw_file = factory;
        self
    }

    pub fn with_scene(mut self, factory: SceneFactory) -> Self {
        self.scene = factory;
        self
    }
}

impl std::fmt::Debug for LoaderFactories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderFactories")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

fn packaged_asset(config: &EngineConfig, address: &str) -> LoadableKind {
    LoadableKind::Asset(AssetLoad::packaged(address, config.asset_dependency_weight))
}

fn packaged_raw_file(_config: &EngineConfig, address: &str) -> LoadableKind {
    LoadableKind::RawFile(RawFileLoad::packaged(address))
}

fn packaged_scene(config: &EngineConfig, address: &str, mode: SceneMode) -> LoadableKind {
    LoadableKind::Scene(SceneLoad::packaged(
        address,
        mode,
        config.scene_dependency_weight,
    ))
}

fn packaged_dependency(_config: &EngineConfig, address: &str, preload: bool) -> LoadableKind {
    LoadableKind::Dependency(DependencyLoad::new(address, LoadMode::Packaged, preload))
}

fn content_package(_config: &EngineConfig, name: &str) -> LoadableKind {
    LoadableKind::Package(PackageLoad::new(name))
}

fn direct_asset(config: &EngineConfig, address: &str) -> LoadableKind {
    LoadableKind::Asset(AssetLoad::direct(address, config.source_dir.join(address)))
}

fn direct_raw_file(config: &EngineConfig, address: &str) -> LoadableKind {
    LoadableKind::RawFile(RawFileLoad::direct(address, config.source_dir.join(address)))
}

fn direct_scene(_config: &EngineConfig, address: &str, mode: SceneMode) -> LoadableKind {
    LoadableKind::Scene(SceneLoad::direct(address, mode))
}

fn direct_dependency(_config: &EngineConfig, address: &str, preload: bool) -> LoadableKind {
    LoadableKind::Dependency(DependencyLoad::new(address, LoadMode::Direct, preload))
}
