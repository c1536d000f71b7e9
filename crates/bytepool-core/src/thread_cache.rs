//! Thread-local handle cache.
//!
//! A magazine-style batching client that shields the arena lock from
//! small, frequent allocations. Each owner keeps one `LocalCache`; freed
//! handles are parked in a per-size-class magazine and served back LIFO on
//! the next same-class request, so repeat traffic never takes the arena
//! lock. The cache uses only the arena's public `allocate`/`free` entry
//! points. All methods take `&mut self`: one cache per thread or task,
//! never shared.

use std::sync::Arc;

use crate::arena::Arena;
use crate::error::AllocError;
use crate::handle::PoolHandle;

/// Default number of cached handles per size class.
pub const DEFAULT_MAGAZINE_CAPACITY: usize = 64;

/// Per-size-class stack of parked handles.
#[derive(Debug)]
struct Magazine {
    handles: Vec<PoolHandle>,
    capacity: usize,
}

impl Magazine {
    fn new(capacity: usize) -> Self {
        Self {
            handles: Vec::new(),
            capacity,
        }
    }

    fn pop(&mut self) -> Option<PoolHandle> {
        self.handles.pop()
    }

    /// Parks a handle, or reports the magazine full.
    fn push(&mut self, handle: PoolHandle) -> bool {
        if self.handles.len() < self.capacity {
            self.handles.push(handle);
            true
        } else {
            false
        }
    }

    fn drain(&mut self) -> Vec<PoolHandle> {
        std::mem::take(&mut self.handles)
    }
}

/// Batching allocate/free client over a shared [`Arena`].
pub struct LocalCache {
    arena: Arc<Arena>,
    magazines: Vec<Magazine>,
    hits: u64,
    misses: u64,
}

impl LocalCache {
    /// Creates a cache with the default magazine capacity.
    pub fn new(arena: Arc<Arena>) -> Self {
        Self::with_capacity(arena, DEFAULT_MAGAZINE_CAPACITY)
    }

    /// Creates a cache holding at most `capacity` handles per size class.
    pub fn with_capacity(arena: Arc<Arena>, capacity: usize) -> Self {
        let classes = arena.size_classes().num_classes();
        Self {
            arena,
            magazines: (0..classes).map(|_| Magazine::new(capacity)).collect(),
            hits: 0,
            misses: 0,
        }
    }

    /// Allocates `bytes`, serving from the magazine when a same-class
    /// handle is parked there and falling back to the arena otherwise.
    pub fn allocate(&mut self, bytes: usize) -> Result<PoolHandle, AllocError> {
        if let Some(class) = self.arena.size_classes().class_of(bytes) {
            if let Some(handle) = self.magazines[class].pop() {
                self.hits += 1;
                return Ok(handle);
            }
            self.misses += 1;
        }
        self.arena.allocate(bytes)
    }

    /// Releases a handle, parking pooled handles in the magazine when there
    /// is room and returning everything else to the arena.
    pub fn free(&mut self, handle: PoolHandle) {
        if handle.is_pooled() {
            let class = self
                .arena
                .size_classes()
                .class_of(handle.len())
                .expect("pooled handle has a canonical class");
            if self.magazines[class].push(handle) {
                return;
            }
        }
        self.arena.free(handle);
    }

    /// Returns every parked handle to the arena.
    pub fn flush(&mut self) {
        for class in 0..self.magazines.len() {
            for handle in self.magazines[class].drain() {
                self.arena.free(handle);
            }
        }
    }

    /// Magazine hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Magazine misses (requests that fell through to the arena).
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Total handles currently parked across all magazines.
    pub fn cached(&self) -> usize {
        self.magazines.iter().map(|m| m.handles.len()).sum()
    }
}

impl Drop for LocalCache {
    fn drop(&mut self) {
        self.flush();
    }
}
