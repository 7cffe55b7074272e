//! Memory Management
//!
//! Pooled object storage for engine subsystems that keep graphs of
//! interlinked objects:
//! - Generational pool with free-list slot recycling
//! - Stable [`PoolHandle`]s that detect stale references
//! - Allocation statistics

use std::marker::PhantomData;

/// Allocation statistics for a pool
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Live objects
    pub allocated: usize,
    /// Peak number of live objects
    pub peak: usize,
    /// Total number of allocations ever made
    pub allocation_count: usize,
}

impl MemoryStats {
    /// Create new memory stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allocation
    pub fn record_alloc(&mut self) {
        self.allocated += 1;
        self.allocation_count += 1;
        self.peak = self.peak.max(self.allocated);
    }

    /// Record a deallocation
    pub fn record_dealloc(&mut self) {
        self.allocated = self.allocated.saturating_sub(1);
    }
}

/// Handle to an object stored in a [`Pool`].
///
/// A handle stays valid until its object is freed; afterwards every lookup
/// with it fails even if the slot has been reused.
pub struct PoolHandle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PoolHandle<T> {
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

// Manual impls: derives would require `T` to implement these traits.
impl<T> Clone for PoolHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PoolHandle<T> {}

impl<T> PartialEq for PoolHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for PoolHandle<T> {}

impl<T> std::hash::Hash for PoolHandle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> std::fmt::Debug for PoolHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PoolHandle({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational object pool.
///
/// Freed slots go onto a free list and are handed out again with a bumped
/// generation.
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    stats: MemoryStats,
}

impl<T> Pool<T> {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            stats: MemoryStats::new(),
        }
    }

    /// Create an empty pool with room for `capacity` objects
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            stats: MemoryStats::new(),
        }
    }

    /// Store an object and return its handle
    pub fn insert(&mut self, value: T) -> PoolHandle<T> {
        self.stats.record_alloc();

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = Some(value);
            return PoolHandle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        PoolHandle::new(index, 0)
    }

    /// Remove an object, returning it if the handle was live
    pub fn remove(&mut self, handle: PoolHandle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }

        let value = slot.value.take()?;
        self.free_list.push(handle.index);
        self.stats.record_dealloc();
        Some(value)
    }

    /// Get an object
    pub fn get(&self, handle: PoolHandle<T>) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Get a mutable object
    pub fn get_mut(&mut self, handle: PoolHandle<T>) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Check whether a handle refers to a live object
    pub fn contains(&self, handle: PoolHandle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.stats.allocated
    }

    /// Check if the pool holds no live objects
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over live objects with their handles
    pub fn iter(&self) -> impl Iterator<Item = (PoolHandle<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (PoolHandle::new(index as u32, slot.generation), value))
        })
    }

    /// Get allocation statistics
    pub fn stats(&self) -> &MemoryStats {
        &self.stats
    }
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}
