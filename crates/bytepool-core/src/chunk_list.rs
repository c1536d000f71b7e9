//! Usage-tier chunk buckets.
//!
//! Chunks are bucketed by how full they are: each [`ChunkList`] covers one
//! usage band, and the bands are chained in increasing-usage order.
//! Allocation walks a band's intrusive list head-first; a chunk whose free
//! bytes drop to the band's floor is promoted to the next band, and a freed
//! chunk that rises above the band's ceiling walks down the chain until a
//! band fits, or falls off the bottom and is destroyed (which by
//! construction only happens at usage 0).
//!
//! Thresholds are exact integer forms of the floor-rounded usage
//! percentage, so boundary comparisons match `Chunk::usage` bit-for-bit
//! without recomputing a percentage on every mutation.

use crate::chunk::{ChunkAlloc, RunRef};
use crate::config::TierBand;
use crate::store::ChunkStore;

/// Largest free-byte count at which a chunk still counts as at least
/// `bound` percent used: `free <= threshold(bound)  <=>  usage >= bound`.
///
/// Derivation, with `usage(f) = 100 - floor(f * 100 / cap)`:
/// `usage(f) >= b  <=>  floor(f * 100 / cap) <= 100 - b
///                <=>  f * 100 < (101 - b) * cap
///                <=>  f <= ceil((101 - b) * cap / 100) - 1`.
/// A bound of 100 forces the threshold to 0.
pub(crate) fn free_threshold(bound: u8, chunk_size: usize) -> usize {
    if bound >= 100 {
        return 0;
    }
    ((101 - bound as usize) * chunk_size).div_ceil(100) - 1
}

/// Largest single allocation any chunk of a band can ever host. A chunk at
/// the band's minimum usage has at most `(100 - min) %` of its capacity
/// free; the minimum is clamped to 1 so a nominal 0% band still implies a
/// nonzero floor of occupancy.
fn max_allocatable(min_usage: u8, chunk_size: usize) -> usize {
    let min_usage = min_usage.max(1);
    if min_usage == 100 {
        return 0;
    }
    chunk_size * (100 - min_usage as usize) / 100
}

/// Outcome of freeing into a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FreeOutcome {
    /// The chunk is still pooled, owned by this tier.
    Kept(usize),
    /// The chunk drained to usage 0 and fell off the bottom of the chain;
    /// the caller must unlink it from the store and release its slab.
    Destroyed,
}

/// One usage band of the tier chain.
#[derive(Debug)]
pub struct ChunkList {
    min_usage: u8,
    max_usage: u8,
    max_capacity: usize,
    /// Free-byte floor: at or below it the chunk is too full for this band.
    free_min_threshold: usize,
    /// Free-byte ceiling: above it the chunk is too empty for this band.
    free_max_threshold: usize,
    head: Option<u32>,
    next: Option<usize>,
    prev: Option<usize>,
}

impl ChunkList {
    pub(crate) fn new(next: Option<usize>, min_usage: u8, max_usage: u8, chunk_size: usize) -> Self {
        assert!(min_usage <= max_usage, "tier band inverted");
        Self {
            min_usage,
            max_usage,
            max_capacity: max_allocatable(min_usage, chunk_size),
            free_min_threshold: free_threshold(max_usage, chunk_size),
            free_max_threshold: free_threshold(min_usage.max(1), chunk_size),
            head: None,
            next,
            prev: None,
        }
    }

    /// Wires the link to the previous (emptier) tier. Set exactly once by
    /// the arena while building the chain.
    pub(crate) fn set_prev(&mut self, prev: usize) {
        assert!(self.prev.is_none(), "tier prev link may only be wired once");
        self.prev = Some(prev);
    }

    /// Lower usage bound, clamped to at least 1 for reporting.
    pub fn min_usage(&self) -> u8 {
        self.min_usage.max(1)
    }

    /// Upper usage bound, clamped to at most 100 for reporting.
    pub fn max_usage(&self) -> u8 {
        self.max_usage.min(100)
    }

    /// Largest single canonical allocation this tier can ever satisfy.
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Free-byte floor below which a resident chunk is promoted.
    pub fn free_min_threshold(&self) -> usize {
        self.free_min_threshold
    }

    /// Free-byte ceiling above which a resident chunk is demoted.
    pub fn free_max_threshold(&self) -> usize {
        self.free_max_threshold
    }

    /// True when no chunk is currently linked into this tier.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// The ordered chain of usage bands plus the init pre-tier, operating over
/// chunks held in a [`ChunkStore`].
///
/// Layout: indices `0..bands.len()` are the configured bands in increasing
/// usage order; the last index is the init pre-tier, which shares the first
/// band's bounds, feeds promotions into band 0, and has no previous tier.
pub struct TierChain {
    lists: Vec<ChunkList>,
    init: usize,
}

impl TierChain {
    pub(crate) fn new(bands: &[TierBand], chunk_size: usize) -> Self {
        let count = bands.len();
        let mut lists: Vec<ChunkList> = bands
            .iter()
            .enumerate()
            .map(|(i, band)| {
                let next = if i + 1 < count { Some(i + 1) } else { None };
                ChunkList::new(next, band.min_usage, band.max_usage, chunk_size)
            })
            .collect();
        for i in 1..count {
            lists[i].set_prev(i - 1);
        }
        lists.push(ChunkList::new(
            Some(0),
            bands[0].min_usage,
            bands[0].max_usage,
            chunk_size,
        ));
        Self { lists, init: count }
    }

    /// Index of the init pre-tier.
    pub(crate) fn init_tier(&self) -> usize {
        self.init
    }

    /// Tier indices in allocation order: the init pre-tier first (it holds
    /// the newest, emptiest chunks), then the bands from emptiest to
    /// fullest.
    pub(crate) fn walk_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.lists.len());
        order.push(self.init);
        order.extend(0..self.init);
        order
    }

    pub(crate) fn tier(&self, tier: usize) -> &ChunkList {
        &self.lists[tier]
    }

    pub(crate) fn num_tiers(&self) -> usize {
        self.lists.len()
    }

    /// Largest canonical size any tier can host; requests above it can
    /// never be pooled.
    pub(crate) fn max_pooled_capacity(&self) -> usize {
        self.lists
            .iter()
            .map(ChunkList::max_capacity)
            .max()
            .unwrap_or(0)
    }

    /// Tries to satisfy one allocation from the chunks of `tier`, promoting
    /// the satisfying chunk if the allocation pushed it past the band's
    /// floor. Returns the chunk's store index with the in-chunk placement.
    pub(crate) fn allocate(
        &mut self,
        store: &mut ChunkStore,
        tier: usize,
        class_index: u16,
        class_size: usize,
        subpage: bool,
    ) -> Option<(u32, ChunkAlloc)> {
        if class_size > self.lists[tier].max_capacity {
            // No chunk of this band can possibly have that much free.
            return None;
        }
        let mut cur = self.lists[tier].head;
        while let Some(index) = cur {
            let chunk = store.get_mut(index);
            let next = chunk.next;
            if let Some(alloc) = chunk.allocate(class_index, class_size, subpage) {
                let list = &self.lists[tier];
                if list.next.is_some() && store.get(index).bytes_free() <= list.free_min_threshold {
                    let target = list.next.expect("promotion requires a next tier");
                    self.remove(store, tier, index);
                    self.add(store, target, index);
                }
                return Some((index, alloc));
            }
            cur = next;
        }
        None
    }

    /// Releases a region back into a chunk of `tier`, demoting (or
    /// destroying) the chunk if the free pushed it past the band's ceiling.
    pub(crate) fn free(
        &mut self,
        store: &mut ChunkStore,
        tier: usize,
        index: u32,
        region: RunRef,
        len: usize,
    ) -> FreeOutcome {
        store.get_mut(index).free(region, len);
        if store.get(index).bytes_free() > self.lists[tier].free_max_threshold {
            self.remove(store, tier, index);
            return self.move0(store, tier, index);
        }
        FreeOutcome::Kept(tier)
    }

    /// Moves an unlinked chunk down the chain from `tier`. Falling off the
    /// bottom destroys the chunk, which only happens at usage 0.
    fn move0(&mut self, store: &mut ChunkStore, tier: usize, index: u32) -> FreeOutcome {
        match self.lists[tier].prev {
            None => {
                assert_eq!(
                    store.get(index).usage(),
                    0,
                    "only an empty chunk may fall off the bottom of the tier chain"
                );
                FreeOutcome::Destroyed
            }
            Some(prev) => self.move_into(store, prev, index),
        }
    }

    /// Re-checks an unlinked chunk against `tier`'s own ceiling: still too
    /// empty keeps descending, otherwise the chunk links in here.
    fn move_into(&mut self, store: &mut ChunkStore, tier: usize, index: u32) -> FreeOutcome {
        debug_assert!(store.get(index).usage() < self.lists[tier].max_usage());
        if store.get(index).bytes_free() > self.lists[tier].free_max_threshold {
            return self.move0(store, tier, index);
        }
        self.add0(store, tier, index);
        FreeOutcome::Kept(tier)
    }

    /// Entry point for chunks arriving from outside the tier's own
    /// promote/demote logic (newly created, or demoted into range). A chunk
    /// already at or past the band's floor is forwarded to the next band
    /// immediately.
    pub(crate) fn add(&mut self, store: &mut ChunkStore, tier: usize, index: u32) {
        if let Some(next) = self.lists[tier].next {
            if store.get(index).bytes_free() <= self.lists[tier].free_min_threshold {
                return self.add(store, next, index);
            }
        }
        self.add0(store, tier, index);
    }

    /// Links a chunk at the head of the tier's list. Most-recently-touched
    /// chunks are found first, which keeps filling active chunks and speeds
    /// their promotion.
    fn add0(&mut self, store: &mut ChunkStore, tier: usize, index: u32) {
        let head = self.lists[tier].head;
        {
            let chunk = store.get_mut(index);
            debug_assert!(chunk.owner.is_none(), "chunk already owned by a tier");
            chunk.owner = Some(tier);
            chunk.prev = None;
            chunk.next = head;
        }
        if let Some(old_head) = head {
            store.get_mut(old_head).prev = Some(index);
        }
        self.lists[tier].head = Some(index);
    }

    /// Unlinks a chunk from the tier's list in O(1) via its own neighbor
    /// links.
    fn remove(&mut self, store: &mut ChunkStore, tier: usize, index: u32) {
        let (prev, next) = {
            let chunk = store.get(index);
            debug_assert_eq!(chunk.owner, Some(tier), "chunk owner disagrees with tier");
            (chunk.prev, chunk.next)
        };
        match prev {
            None => self.lists[tier].head = next,
            Some(p) => store.get_mut(p).next = next,
        }
        if let Some(n) = next {
            store.get_mut(n).prev = prev;
        }
        let chunk = store.get_mut(index);
        chunk.prev = None;
        chunk.next = None;
        chunk.owner = None;
    }

    /// Store indices of the chunks in one tier, head first.
    pub(crate) fn chunks_in(&self, store: &ChunkStore, tier: usize) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cur = self.lists[tier].head;
        while let Some(index) = cur {
            out.push(index);
            cur = store.get(index).next;
        }
        out
    }

    /// Unlinks every chunk from every tier for shutdown and returns their
    /// store indices.
    pub(crate) fn drain_all(&mut self, store: &mut ChunkStore) -> Vec<u32> {
        let mut out = Vec::new();
        for tier in 0..self.lists.len() {
            let mut cur = self.lists[tier].head.take();
            while let Some(index) = cur {
                let chunk = store.get_mut(index);
                cur = chunk.next.take();
                chunk.prev = None;
                chunk.owner = None;
                out.push(index);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slab::{HeapSlabSource, SlabSource};

    const PAGE: usize = 4096;
    const CAP: usize = 16384;

    fn bands() -> Vec<TierBand> {
        vec![
            TierBand::new(0, 25),
            TierBand::new(25, 50),
            TierBand::new(50, 75),
            TierBand::new(75, 100),
            TierBand::new(100, 100),
        ]
    }

    fn chain() -> TierChain {
        TierChain::new(&bands(), CAP)
    }

    fn new_chunk(store: &mut ChunkStore) -> u32 {
        let slab = HeapSlabSource.allocate_slab(CAP).unwrap();
        store.insert(crate::chunk::Chunk::new(slab, PAGE, 2, 0)).index
    }

    fn usage(free: usize, cap: usize) -> u8 {
        (100 - free * 100 / cap) as u8
    }

    #[test]
    fn test_threshold_matches_usage_formula() {
        // The integer thresholds must agree with the floor-rounded usage
        // percentage at every free-byte count, for every bound.
        for &cap in &[100usize, 128, 4096, 16384, 1 << 24] {
            for bound in 1..=100u8 {
                let threshold = free_threshold(bound, cap);
                for free in [0, 1, threshold.saturating_sub(1), threshold, threshold + 1, cap] {
                    if free > cap {
                        continue;
                    }
                    assert_eq!(
                        free <= threshold,
                        usage(free, cap) >= bound,
                        "cap={cap} bound={bound} free={free}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_threshold_boundary_at_100() {
        assert_eq!(free_threshold(100, 16384), 0);
        assert_eq!(free_threshold(100, 100), 0);
    }

    #[test]
    fn test_reference_thresholds() {
        // cap=100 band [75,100]: floor at usage 100, ceiling at usage 75.
        let list = ChunkList::new(None, 75, 100, 100);
        assert_eq!(list.free_min_threshold(), 0);
        assert_eq!(list.free_max_threshold(), 25);
        // cap=100 band [0,25]: effective minimum of 1.
        let list = ChunkList::new(None, 0, 25, 100);
        assert_eq!(list.free_min_threshold(), 75);
        assert_eq!(list.free_max_threshold(), 99);
    }

    #[test]
    fn test_max_capacity() {
        assert_eq!(ChunkList::new(None, 25, 50, 100).max_capacity(), 75);
        assert_eq!(ChunkList::new(None, 0, 25, 100).max_capacity(), 99);
        assert_eq!(ChunkList::new(None, 100, 100, 100).max_capacity(), 0);
        assert_eq!(
            ChunkList::new(None, 25, 75, 1 << 24).max_capacity(),
            (1usize << 24) * 75 / 100
        );
    }

    #[test]
    #[should_panic(expected = "band inverted")]
    fn test_inverted_band_panics() {
        ChunkList::new(None, 50, 25, 100);
    }

    #[test]
    #[should_panic(expected = "wired once")]
    fn test_prev_wired_twice_panics() {
        let mut list = ChunkList::new(None, 0, 25, 100);
        list.set_prev(0);
        list.set_prev(1);
    }

    #[test]
    fn test_add_forwards_full_chunk() {
        let mut chain = chain();
        let mut store = ChunkStore::new();
        let index = new_chunk(&mut store);

        // Take the chunk to 75% before it ever enters the chain.
        let a = store.get_mut(index).allocate(0, CAP / 2, false).unwrap();
        let b = store.get_mut(index).allocate(0, PAGE, false).unwrap();
        let _ = (a, b);
        assert_eq!(store.get(index).usage(), 75);

        chain.add(&mut store, chain.init_tier(), index);
        // Band [75,100] is index 3 in the configured bands.
        assert_eq!(store.get(index).owner, Some(3));
    }

    #[test]
    fn test_allocate_promotes_across_threshold() {
        let mut chain = chain();
        let mut store = ChunkStore::new();
        let index = new_chunk(&mut store);
        chain.add(&mut store, chain.init_tier(), index);
        assert_eq!(store.get(index).owner, Some(chain.init_tier()));

        // One page: usage 25, too full for the init band [0,25).
        let (owner_index, _) = chain
            .allocate(&mut store, chain.init_tier(), 0, PAGE, false)
            .unwrap();
        assert_eq!(owner_index, index);
        assert_eq!(store.get(index).owner, Some(1), "expected band [25,50)");
    }

    #[test]
    fn test_allocate_rejects_above_max_capacity() {
        let mut chain = chain();
        let mut store = ChunkStore::new();
        let index = new_chunk(&mut store);
        chain.add(&mut store, chain.init_tier(), index);

        // The init band's max capacity is 99% of the chunk; a full-chunk
        // run can never be hosted there.
        assert!(chain
            .allocate(&mut store, chain.init_tier(), 0, CAP, false)
            .is_none());
        // The chunk itself was never consulted.
        assert_eq!(store.get(index).bytes_free(), CAP);
    }

    #[test]
    fn test_free_demotes_recursively() {
        let mut chain = chain();
        let mut store = ChunkStore::new();
        let index = new_chunk(&mut store);

        // 75% full, sitting in band [75,100].
        let half = store.get_mut(index).allocate(0, CAP / 2, false).unwrap();
        let page = store.get_mut(index).allocate(0, PAGE, false).unwrap();
        chain.add(&mut store, chain.init_tier(), index);
        assert_eq!(store.get(index).owner, Some(3));

        // Free the half-chunk run: usage drops to 25, which must walk down
        // past [50,75) into [25,50).
        let outcome = chain.free(&mut store, 3, index, half.region, CAP / 2);
        assert_eq!(outcome, FreeOutcome::Kept(1));
        assert_eq!(store.get(index).owner, Some(1));

        // Free the last page: usage 0 falls off the bottom.
        let outcome = chain.free(&mut store, 1, index, page.region, PAGE);
        assert_eq!(outcome, FreeOutcome::Destroyed);
        assert_eq!(store.get(index).owner, None);
    }

    #[test]
    fn test_free_within_band_keeps_chunk() {
        let mut chain = chain();
        let mut store = ChunkStore::new();
        let index = new_chunk(&mut store);

        let _half = store.get_mut(index).allocate(0, CAP / 2, false).unwrap();
        let page = store.get_mut(index).allocate(0, PAGE, false).unwrap();
        chain.add(&mut store, chain.init_tier(), index);
        assert_eq!(store.get(index).owner, Some(3));

        // Usage 75 -> 50: leaves [75,100) and settles one band down.
        let outcome = chain.free(&mut store, 3, index, page.region, PAGE);
        assert_eq!(outcome, FreeOutcome::Kept(2));
        assert_eq!(store.get(index).usage(), 50);
    }

    #[test]
    fn test_walk_order_starts_at_init() {
        let chain = chain();
        let order = chain.walk_order();
        assert_eq!(order[0], chain.init_tier());
        assert_eq!(&order[1..], &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_head_insert_order() {
        let mut chain = chain();
        let mut store = ChunkStore::new();
        let a = new_chunk(&mut store);
        let b = new_chunk(&mut store);
        chain.add(&mut store, chain.init_tier(), a);
        chain.add(&mut store, chain.init_tier(), b);
        // Most recently added chunk is found first.
        assert_eq!(chain.chunks_in(&store, chain.init_tier()), vec![b, a]);
    }

    #[test]
    fn test_drain_all_empties_every_tier() {
        let mut chain = chain();
        let mut store = ChunkStore::new();
        let a = new_chunk(&mut store);
        let b = new_chunk(&mut store);
        chain.add(&mut store, chain.init_tier(), a);
        chain.add(&mut store, chain.init_tier(), b);

        let drained = chain.drain_all(&mut store);
        assert_eq!(drained.len(), 2);
        for tier in 0..chain.num_tiers() {
            assert!(chain.tier(tier).is_empty());
        }
    }
}
