//! Frame scheduler
//!
//! Keeps the registry of in-flight loadables in registration order and
//! tracks how much of the current frame's budget has been spent. The engine
//! walks the registry once per frame; long loops inside a tick check
//! [`Scheduler::is_busy`] before each item and yield when it returns true.

use std::time::{Duration, Instant};

use super::loadable::Handle;

/// Per-frame work budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Wall-clock time a frame may spend loading
    pub time_slice: Duration,
    /// Optional cap on work items per frame
    pub max_items: Option<usize>,
}

impl Budget {
    pub fn new(time_slice: Duration, max_items: Option<usize>) -> Self {
        Self {
            time_slice,
            max_items,
        }
    }
}

#[derive(Debug)]
pub struct Scheduler {
    budget: Budget,
    /// Registration order; deregistered slots are tombstoned until `compact`
    registry: Vec<Option<Handle>>,
    frame: u64,
    frame_start: Instant,
    items_this_frame: usize,
}

impl Scheduler {
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            registry: Vec::new(),
            frame: 0,
            frame_start: Instant::now(),
            items_this_frame: 0,
        }
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    pub fn set_budget(&mut self, budget: Budget) {
        self.budget = budget;
    }

    /// Add to the tick list. Registering twice is a no-op.
    pub fn register(&mut self, handle: Handle) {
        if self.contains(handle) {
            return;
        }
        self.registry.push(Some(handle));
    }

    /// Remove from the tick list without shifting indices
    pub fn deregister(&mut self, handle: Handle) -> bool {
        for slot in &mut self.registry {
            if *slot == Some(handle) {
                *slot = None;
                return true;
            }
        }
        false
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.registry.iter().any(|slot| *slot == Some(handle))
    }

    /// Start a new frame, resetting the budget. Returns the frame number.
    pub fn begin_frame(&mut self) -> u64 {
        self.frame += 1;
        self.frame_start = Instant::now();
        self.items_this_frame = 0;
        self.frame
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Record `items` units of work against this frame
    pub fn consume(&mut self, items: usize) {
        self.items_this_frame += items;
    }

    pub fn items_this_frame(&self) -> usize {
        self.items_this_frame
    }

    /// True once this frame's time slice or item cap is used up
    pub fn is_busy(&self) -> bool {
        if let Some(max) = self.budget.max_items {
            if self.items_this_frame >= max {
                return true;
            }
        }
        self.frame_start.elapsed() >= self.budget.time_slice
    }

    /// Registry slot at `index`; `None` past the end, `Some(None)` for a tombstone
    pub fn get(&self, index: usize) -> Option<Option<Handle>> {
        self.registry.get(index).copied()
    }

    /// Drop tombstones, keeping order
    pub fn compact(&mut self) {
        self.registry.retain(Option::is_some);
    }

    /// Number of registered loadables
    pub fn len(&self) -> usize {
        self.registry.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered handles in tick order
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.registry.iter().flatten().copied()
    }
}
