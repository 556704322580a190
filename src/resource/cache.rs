//! Resource cache - reference-counted table of live loadables
//!
//! One entry per [`CacheKey`]; every requester of the same key shares the
//! same loadable. The cache only does the bookkeeping; deciding when an
//! entry may actually be torn down (terminal state, usage table) is the
//! engine's job.
//!
//! The usage table is a second, independent record of who still needs a
//! key. It exists for package data backing scene-graph nodes: the host owns
//! those nodes, so their packages must outlive the reference count until
//! the host reports the node destroyed.

use std::collections::{HashMap, HashSet};

use super::loadable::{CacheKey, Handle};

/// A cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub handle: Handle,
    ref_count: usize,
    /// Unreferenced but kept alive by the usage table
    parked: bool,
}

impl CacheEntry {
    fn new(handle: Handle) -> Self {
        Self {
            handle,
            ref_count: 1,
            parked: false,
        }
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn is_parked(&self) -> bool {
        self.parked
    }
}

/// Result of [`ResourceCache::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// No entry for the key
    Unknown,
    /// Count was already zero; nothing changed
    OverRelease,
    /// Still referenced, with the remaining count
    Alive(usize),
    /// Count just reached zero
    Unused(Handle),
}

/// Consumers still using each key, independent of the reference count
#[derive(Debug, Default)]
pub struct UsageTable {
    consumers: HashMap<CacheKey, HashSet<u64>>,
}

impl UsageTable {
    pub fn mark(&mut self, key: CacheKey, consumer: u64) {
        self.consumers.entry(key).or_default().insert(consumer);
    }

    /// Forget `consumer` everywhere; returns the keys nobody uses any more
    pub fn clear_consumer(&mut self, consumer: u64) -> Vec<CacheKey> {
        let mut freed = Vec::new();
        self.consumers.retain(|key, consumers| {
            if consumers.remove(&consumer) && consumers.is_empty() {
                freed.push(key.clone());
                return false;
            }
            !consumers.is_empty()
        });
        freed.sort();
        freed
    }

    pub fn is_in_use(&self, key: &CacheKey) -> bool {
        self.consumers
            .get(key)
            .is_some_and(|consumers| !consumers.is_empty())
    }

    pub fn consumers(&self, key: &CacheKey) -> usize {
        self.consumers.get(key).map_or(0, HashSet::len)
    }
}

#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: HashMap<CacheKey, CacheEntry>,
    usage: UsageTable,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference to an existing entry, reviving it if parked
    pub fn add_ref(&mut self, key: &CacheKey) -> Option<Handle> {
        let entry = self.entries.get_mut(key)?;
        entry.ref_count += 1;
        entry.parked = false;
        Some(entry.handle)
    }

    /// Insert a fresh entry with a count of one
    pub fn insert(&mut self, key: CacheKey, handle: Handle) {
        if let Some(old) = self.entries.insert(key.clone(), CacheEntry::new(handle)) {
            log::warn!("Replacing live cache entry for {} ({:?})", key, old.handle);
        }
    }

    /// Drop one reference. Never goes below zero.
    pub fn release(&mut self, key: &CacheKey) -> ReleaseOutcome {
        let Some(entry) = self.entries.get_mut(key) else {
            return ReleaseOutcome::Unknown;
        };
        match entry.ref_count {
            0 => ReleaseOutcome::OverRelease,
            1 => {
                entry.ref_count = 0;
                ReleaseOutcome::Unused(entry.handle)
            }
            n => {
                entry.ref_count = n - 1;
                ReleaseOutcome::Alive(n - 1)
            }
        }
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    /// Keep an unreferenced entry alive for the usage table
    pub fn park(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.parked = true;
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn ref_count(&self, key: &CacheKey) -> usize {
        self.entries.get(key).map_or(0, CacheEntry::ref_count)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of parked entries
    pub fn parked(&self) -> usize {
        self.entries.values().filter(|entry| entry.parked).count()
    }

    pub fn usage(&self) -> &UsageTable {
        &self.usage
    }

    pub fn usage_mut(&mut self) -> &mut UsageTable {
        &mut self.usage
    }

    /// Get all keys currently in the cache
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<_> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}
