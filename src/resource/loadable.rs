//! Loadable state machine
//!
//! Every unit of asynchronous loading work (asset, raw file, scene,
//! dependency set, package) is a [`Loadable`]: a [`LoadState`] shared by all
//! kinds plus the kind-specific data in [`LoadableKind`]. The engine drives
//! all of them through one driver, so the state graph lives here:
//!
//! ```text
//! Idle -> Loading <-> DependentLoading
//!            |               |
//!            +--> Done | Error <--+
//! ```
//!
//! Terminal states are final. Progress only grows and is pinned to 1.0 on
//! success.

use std::fmt;

use super::dependency::DependencyLoad;
use super::kinds::{AssetLoad, PackageLoad, RawFileLoad, SceneLoad};

slotmap::new_key_type! {
    /// Handle to a live loadable inside an [`Engine`](super::engine::Engine)
    pub struct Handle;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Idle,
    Loading,
    DependentLoading,
    Done,
    Error,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Error)
    }

    /// Whether the state graph allows moving from `self` to `next`
    pub fn can_transition(self, next: Status) -> bool {
        use Status::*;
        matches!(
            (self, next),
            (Idle, Loading)
                | (Loading, DependentLoading)
                | (DependentLoading, Loading)
                | (Loading, Done)
                | (Loading, Error)
                | (DependentLoading, Done)
                | (DependentLoading, Error)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Idle => "idle",
            Status::Loading => "loading",
            Status::DependentLoading => "dependent-loading",
            Status::Done => "done",
            Status::Error => "error",
        };
        f.write_str(name)
    }
}

/// Resource kind, part of the cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KindTag {
    Asset,
    RawFile,
    Scene,
    Dependency,
    Package,
}

impl fmt::Display for KindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KindTag::Asset => "asset",
            KindTag::RawFile => "raw-file",
            KindTag::Scene => "scene",
            KindTag::Dependency => "dependency",
            KindTag::Package => "package",
        };
        f.write_str(name)
    }
}

/// Cache identity: one live loadable per kind and address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub kind: KindTag,
    pub address: String,
}

impl CacheKey {
    pub fn new(kind: KindTag, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.address)
    }
}

/// Passed to completion callbacks
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub handle: Handle,
    pub address: String,
    pub status: Status,
    pub error: Option<String>,
}

impl Completion {
    pub fn is_ok(&self) -> bool {
        self.status == Status::Done
    }
}

pub type CompletionCallback = Box<dyn FnOnce(&Completion)>;

/// What a kind hook asks the driver to do next
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Not finished; tick again next frame
    Continue,
    /// Finish with success (`None`) or the given error
    Finish(Option<String>),
}

impl Step {
    pub fn done() -> Self {
        Step::Finish(None)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Step::Finish(Some(message.into()))
    }
}

/// Kind-independent part of a loadable
pub struct LoadState {
    status: Status,
    progress: f32,
    error: Option<String>,
    callbacks: Vec<CompletionCallback>,
    /// Frame in which the loadable was last ticked
    pub(crate) last_tick: Option<u64>,
}

impl Default for LoadState {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadState {
    pub fn new() -> Self {
        Self {
            status: Status::Idle,
            progress: 0.0,
            error: None,
            callbacks: Vec::new(),
            last_tick: None,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move along the state graph. Illegal moves are refused and logged.
    pub fn transition(&mut self, next: Status) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_transition(next) {
            log::warn!("Refusing status change {} -> {}", self.status, next);
            return false;
        }
        self.status = next;
        true
    }

    /// Raise progress; lowering it or touching a terminal state is ignored
    pub fn set_progress(&mut self, progress: f32) {
        if self.is_terminal() || !progress.is_finite() {
            return;
        }
        self.progress = self.progress.max(progress.clamp(0.0, 1.0));
    }

    /// Enter the terminal state and hand back the callbacks to fire.
    ///
    /// Returns `None` if already terminal or if the state graph does not
    /// allow finishing from the current status.
    pub fn finish(&mut self, error: Option<String>) -> Option<Vec<CompletionCallback>> {
        if self.is_terminal() {
            return None;
        }
        let next = if error.is_some() { Status::Error } else { Status::Done };
        if !self.transition(next) {
            return None;
        }
        match error {
            None => self.progress = 1.0,
            Some(message) => self.error = Some(message),
        }
        Some(std::mem::take(&mut self.callbacks))
    }

    pub fn push_callback(&mut self, callback: CompletionCallback) {
        self.callbacks.push(callback);
    }
}

impl fmt::Debug for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadState")
            .field("status", &self.status)
            .field("progress", &self.progress)
            .field("error", &self.error)
            .field("callbacks", &self.callbacks.len())
            .field("last_tick", &self.last_tick)
            .finish()
    }
}

/// Kind-specific data; exactly one variant per resource kind
#[derive(Debug)]
pub enum LoadableKind {
    Asset(AssetLoad),
    RawFile(RawFileLoad),
    Scene(SceneLoad),
    Dependency(DependencyLoad),
    Package(PackageLoad),
}

impl LoadableKind {
    pub fn tag(&self) -> KindTag {
        match self {
            LoadableKind::Asset(_) => KindTag::Asset,
            LoadableKind::RawFile(_) => KindTag::RawFile,
            LoadableKind::Scene(_) => KindTag::Scene,
            LoadableKind::Dependency(_) => KindTag::Dependency,
            LoadableKind::Package(_) => KindTag::Package,
        }
    }
}

#[derive(Debug)]
pub struct Loadable {
    pub key: CacheKey,
    pub state: LoadState,
    /// Taken out while a hook runs
    pub(crate) kind: Option<LoadableKind>,
}

impl Loadable {
    pub fn new(key: CacheKey, kind: LoadableKind) -> Self {
        Self {
            key,
            state: LoadState::new(),
            kind: Some(kind),
        }
    }

    pub fn kind(&self) -> Option<&LoadableKind> {
        self.kind.as_ref()
    }
}
