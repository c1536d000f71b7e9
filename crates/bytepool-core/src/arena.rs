//! Arena orchestration.
//!
//! One arena owns the tier chain and every chunk in it. Requests are routed
//! by size class: anything above the chunk size goes straight to the
//! backing store (unpooled, tracked in a side table), everything else walks
//! the tier chain emptiest-first and escalates to a fresh chunk only when
//! no tier can satisfy the request. All structural mutation, tier
//! membership changes and chunk creation/destruction included, happens
//! under the arena's own mutex; a free and the demotion or destruction it
//! triggers are indivisible. Dropping the arena (or calling `close`)
//! releases every slab exactly once.
//!
//! Arenas are independent: one per logical owner, sharing no locks.

use parking_lot::Mutex;

use crate::chunk::{Chunk, ChunkAlloc, RunRef};
use crate::chunk_list::{FreeOutcome, TierChain};
use crate::config::PoolConfig;
use crate::error::AllocError;
use crate::handle::{PoolHandle, Route};
use crate::metrics::{ChunkMetrics, PoolMetrics, PoolStats, TierMetrics};
use crate::size_class::SizeClassTable;
use crate::slab::{HeapSlabSource, Slab, SlabSource};
use crate::store::{ChunkId, ChunkStore};

/// A segregated, usage-tiered pooled allocator instance.
pub struct Arena {
    size_classes: SizeClassTable,
    page_size: usize,
    max_order: u32,
    chunk_size: usize,
    inner: Mutex<ArenaInner>,
}

struct ArenaInner {
    store: ChunkStore,
    chain: TierChain,
    source: Box<dyn SlabSource>,
    huge: Vec<Option<Slab>>,
    huge_generations: Vec<u32>,
    huge_free: Vec<u32>,
    stats: PoolStats,
    closed: bool,
}

impl Arena {
    /// Creates an arena backed by the default heap slab source.
    pub fn new(config: PoolConfig) -> Self {
        Self::with_source(config, Box::new(HeapSlabSource))
    }

    /// Creates an arena drawing slabs from a caller-provided source.
    pub fn with_source(config: PoolConfig, source: Box<dyn SlabSource>) -> Self {
        config.validate();
        let chunk_size = config.chunk_size();
        Self {
            size_classes: SizeClassTable::new(config.page_size, chunk_size),
            page_size: config.page_size,
            max_order: config.max_order,
            chunk_size,
            inner: Mutex::new(ArenaInner {
                store: ChunkStore::new(),
                chain: TierChain::new(&config.bands, chunk_size),
                source,
                huge: Vec::new(),
                huge_generations: Vec::new(),
                huge_free: Vec::new(),
                stats: PoolStats::default(),
                closed: false,
            }),
        }
    }

    /// Allocates `bytes`, rounding up to the canonical size class.
    ///
    /// Requests above the chunk size take the unpooled path automatically.
    /// Requests whose canonical size exceeds every tier's capacity fail
    /// with [`AllocError::CapacityExceeded`] without touching any chunk;
    /// the caller may fall back to [`allocate_unpooled`](Self::allocate_unpooled).
    pub fn allocate(&self, bytes: usize) -> Result<PoolHandle, AllocError> {
        let Some(class) = self.size_classes.class_of(bytes) else {
            return self.allocate_unpooled(bytes);
        };
        let class_size = self.size_classes.byte_size_of(class);
        let subpage = self.size_classes.is_subpage(class);

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        assert!(!inner.closed, "allocate on a closed arena");

        let max_pooled = inner.chain.max_pooled_capacity();
        if class_size > max_pooled {
            return Err(AllocError::CapacityExceeded {
                requested: bytes,
                normalized: class_size,
                max_pooled,
            });
        }

        // Emptiest tier first: the init pre-tier, then the bands upward.
        for tier in inner.chain.walk_order() {
            if let Some((index, alloc)) =
                inner
                    .chain
                    .allocate(&mut inner.store, tier, class as u16, class_size, subpage)
            {
                inner.stats.allocations += 1;
                inner.stats.live_bytes += class_size;
                return Ok(Self::pooled_handle(inner.store.id_of(index), class_size, alloc));
            }
        }

        // Chain exhausted: carve the allocation from a brand-new chunk and
        // let the init tier route it to the band it was born into.
        let slab = inner
            .source
            .allocate_slab(self.chunk_size)
            .ok_or(AllocError::SlabExhausted {
                capacity: self.chunk_size,
            })?;
        let mut chunk = Chunk::new(
            slab,
            self.page_size,
            self.max_order,
            self.size_classes.num_subpage_classes(),
        );
        let alloc = chunk
            .allocate(class as u16, class_size, subpage)
            .expect("a fresh chunk satisfies any in-capacity request");
        let id = inner.store.insert(chunk);
        let init = inner.chain.init_tier();
        inner.chain.add(&mut inner.store, init, id.index);
        inner.stats.chunks_created += 1;
        inner.stats.allocations += 1;
        inner.stats.live_bytes += class_size;
        Ok(Self::pooled_handle(id, class_size, alloc))
    }

    /// Allocates a dedicated slab outside the pool. Used automatically for
    /// huge requests and available as the fallback for
    /// [`AllocError::CapacityExceeded`].
    pub fn allocate_unpooled(&self, bytes: usize) -> Result<PoolHandle, AllocError> {
        assert!(bytes > 0, "zero-byte unpooled allocation");
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        assert!(!inner.closed, "allocate on a closed arena");

        let slab = inner
            .source
            .allocate_slab(bytes)
            .ok_or(AllocError::SlabExhausted { capacity: bytes })?;
        let slot = match inner.huge_free.pop() {
            Some(slot) => {
                inner.huge[slot as usize] = Some(slab);
                slot
            }
            None => {
                let slot = inner.huge.len() as u32;
                inner.huge.push(Some(slab));
                inner.huge_generations.push(0);
                slot
            }
        };
        let generation = inner.huge_generations[slot as usize];
        inner.stats.allocations += 1;
        inner.stats.huge_allocations += 1;
        inner.stats.live_bytes += bytes;
        Ok(PoolHandle {
            route: Route::Huge { slot, generation },
            offset: 0,
            len: bytes,
        })
    }

    /// Releases an allocation. The handle routes straight to the owning
    /// chunk and its current tier; the tier decides on demotion or
    /// destruction atomically with the release.
    ///
    /// Panics on a stale or foreign handle (generation mismatch) and on
    /// double frees: both mean the pool's bookkeeping no longer matches the
    /// caller's, which must not be papered over.
    pub fn free(&self, handle: PoolHandle) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match handle.route {
            Route::Huge { slot, generation } => {
                assert_eq!(
                    inner.huge_generations[slot as usize], generation,
                    "stale huge handle: generation mismatch"
                );
                let slab = inner.huge[slot as usize]
                    .take()
                    .expect("huge slab already released");
                inner.huge_generations[slot as usize] =
                    inner.huge_generations[slot as usize].wrapping_add(1);
                inner.huge_free.push(slot);
                inner.source.release_slab(slab);
            }
            Route::Run { chunk, node } => {
                Self::free_pooled(inner, chunk, RunRef::Run { node }, handle.len);
            }
            Route::Subpage { chunk, node, bit } => {
                Self::free_pooled(inner, chunk, RunRef::Subpage { node, bit }, handle.len);
            }
        }
        inner.stats.frees += 1;
        inner.stats.live_bytes -= handle.len;
    }

    fn free_pooled(inner: &mut ArenaInner, chunk: ChunkId, region: RunRef, len: usize) {
        let tier = inner
            .store
            .resolve(chunk)
            .owner
            .expect("pooled chunk is not linked into any tier");
        match inner.chain.free(&mut inner.store, tier, chunk.index, region, len) {
            FreeOutcome::Kept(_) => {}
            FreeOutcome::Destroyed => {
                let destroyed = inner.store.remove(chunk.index);
                inner.source.release_slab(destroyed.into_slab());
                inner.stats.chunks_destroyed += 1;
            }
        }
    }

    /// Runs `f` over the region named by `handle`, read-only, under the
    /// arena lock.
    pub fn with_slice<R>(&self, handle: &PoolHandle, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.inner.lock();
        match handle.route {
            Route::Huge { slot, generation } => {
                assert_eq!(
                    guard.huge_generations[slot as usize], generation,
                    "stale huge handle: generation mismatch"
                );
                let slab = guard.huge[slot as usize]
                    .as_ref()
                    .expect("huge slab already released");
                f(&slab.as_slice()[..handle.len])
            }
            Route::Run { chunk, .. } | Route::Subpage { chunk, .. } => {
                f(guard.store.resolve(chunk).slice(handle.offset, handle.len))
            }
        }
    }

    /// Runs `f` over the region named by `handle`, writable, under the
    /// arena lock.
    pub fn with_slice_mut<R>(&self, handle: &PoolHandle, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match handle.route {
            Route::Huge { slot, generation } => {
                assert_eq!(
                    inner.huge_generations[slot as usize], generation,
                    "stale huge handle: generation mismatch"
                );
                let slab = inner.huge[slot as usize]
                    .as_mut()
                    .expect("huge slab already released");
                f(&mut slab.as_mut_slice()[..handle.len])
            }
            Route::Run { chunk, .. } | Route::Subpage { chunk, .. } => f(inner
                .store
                .resolve_mut(chunk)
                .slice_mut(handle.offset, handle.len)),
        }
    }

    /// Consistent snapshot of every tier and its chunks, plus the
    /// cumulative counters.
    pub fn metrics(&self) -> PoolMetrics {
        let guard = self.inner.lock();
        let inner = &*guard;
        let mut tiers = Vec::with_capacity(inner.chain.num_tiers());
        for tier in inner.chain.walk_order() {
            let list = inner.chain.tier(tier);
            let chunks = inner
                .chain
                .chunks_in(&inner.store, tier)
                .into_iter()
                .map(|index| {
                    let chunk = inner.store.get(index);
                    ChunkMetrics {
                        usage: chunk.usage(),
                        capacity: chunk.capacity(),
                        free_bytes: chunk.bytes_free(),
                    }
                })
                .collect();
            tiers.push(TierMetrics {
                min_usage: list.min_usage(),
                max_usage: list.max_usage(),
                chunks,
            });
        }
        PoolMetrics {
            tiers,
            stats: inner.stats,
        }
    }

    /// Cumulative counters.
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats
    }

    /// Releases every chunk in every tier and every huge slab back to the
    /// backing store. Idempotent; called automatically on drop. Allocating
    /// afterwards panics.
    pub fn close(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.closed {
            return;
        }
        for index in inner.chain.drain_all(&mut inner.store) {
            let chunk = inner.store.remove(index);
            inner.source.release_slab(chunk.into_slab());
            inner.stats.chunks_destroyed += 1;
        }
        for slot in 0..inner.huge.len() {
            if let Some(slab) = inner.huge[slot].take() {
                inner.huge_generations[slot] = inner.huge_generations[slot].wrapping_add(1);
                inner.source.release_slab(slab);
            }
        }
        inner.closed = true;
    }

    /// The size-class table shared by every request routed through this
    /// arena.
    pub fn size_classes(&self) -> &SizeClassTable {
        &self.size_classes
    }

    /// Capacity of one chunk slab.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Run granularity of the buddy allocator.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn pooled_handle(id: ChunkId, class_size: usize, alloc: ChunkAlloc) -> PoolHandle {
        let route = match alloc.region {
            RunRef::Run { node } => Route::Run { chunk: id, node },
            RunRef::Subpage { node, bit } => Route::Subpage {
                chunk: id,
                node,
                bit,
            },
        };
        PoolHandle {
            route,
            offset: alloc.offset,
            len: class_size,
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Arena")
            .field("chunk_size", &self.chunk_size)
            .field("page_size", &self.page_size)
            .field("stats", &stats)
            .finish()
    }
}
