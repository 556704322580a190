// Resource Module
// Resolves, loads, shares and unloads packaged game content

pub mod backend;
pub mod cache;
pub mod dependency;
pub mod engine;
pub mod factory;
pub mod kinds;
pub mod loadable;
pub mod manifest;
pub mod scheduler;
pub mod version;

#[cfg(test)]
mod tests;

pub use backend::{
    BackendStats, ContentBackend, FsBackend, LoadPoll, LoadedObject, MemoryBackend, ObjectKind,
    ObjectSource, SceneMode,
};
pub use engine::Engine;
pub use factory::LoaderFactories;
pub use loadable::{CacheKey, Completion, Handle, KindTag, Status};
pub use manifest::{AssetEntry, Manifest, ManifestError, PackageDescriptor};
pub use scheduler::Budget;
pub use version::{VersionError, VersionRecord, VersionStore};
