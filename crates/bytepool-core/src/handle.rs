//! Opaque allocation handles.
//!
//! A handle carries everything a later `free` needs to reach the owning
//! chunk without re-searching the tier chain: the chunk's generational id
//! plus the run or subpage slot inside it. Huge allocations carry their
//! side-table slot instead. Handles are plain copyable records; the arena
//! validates generations on every use, so a stale handle fails fast.

use crate::store::ChunkId;

/// How to route a handle back to the memory it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// A buddy run rooted at `node` of the chunk's free tree.
    Run { chunk: ChunkId, node: u32 },
    /// One element of a page-local bitmap sub-allocator.
    Subpage { chunk: ChunkId, node: u32, bit: u32 },
    /// An unpooled slab in the arena's side table.
    Huge { slot: u32, generation: u32 },
}

/// Opaque reference to one allocation made by an
/// [`Arena`](crate::arena::Arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHandle {
    pub(crate) route: Route,
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

impl PoolHandle {
    /// Canonical length of the region in bytes (the size-class size, which
    /// may exceed the requested size).
    pub fn len(&self) -> usize {
        self.len
    }

    /// A zero-length handle cannot exist; allocations round up to the
    /// smallest size class.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Byte offset of the region within its chunk slab. Zero for huge
    /// allocations, which own their whole slab.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// True when the region lives inside a pooled chunk, false for huge
    /// allocations.
    pub fn is_pooled(&self) -> bool {
        !matches!(self.route, Route::Huge { .. })
    }
}
