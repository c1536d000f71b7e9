//! Chunk: buddy/run allocator over one owned slab.
//!
//! A chunk owns one power-of-two slab and carves it into runs with a binary
//! free tree. Each node value records the shallowest depth at which its
//! subtree still holds an entirely free run, so an allocation descends from
//! the root in O(max_order) steps and a free re-merges two free buddies into
//! their parent immediately. Size classes below one page are delegated to
//! page-local bitmap sub-allocators: a page is claimed from the run
//! allocator for exactly one class, serves same-class requests by bit
//! scanning, and is handed back when its last element is freed.
//!
//! `bytes_free` moves only at run granularity, page claims and releases
//! included, which is what keeps the allocate/free round-trip exact for
//! sub-page allocations.

use std::collections::HashMap;

use crate::slab::Slab;

/// Position of an allocation inside its chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunRef {
    /// A whole buddy run rooted at this tree node.
    Run { node: u32 },
    /// One element of the bitmap sub-allocator claimed at this node's page.
    Subpage { node: u32, bit: u32 },
}

/// A successful in-chunk allocation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkAlloc {
    pub region: RunRef,
    pub offset: usize,
}

fn depth_of(node: u32) -> u32 {
    31 - node.leading_zeros()
}

/// One slab subdivided by the buddy tree.
pub struct Chunk {
    slab: Slab,
    page_size: usize,
    max_order: u32,
    capacity: usize,
    free_bytes: usize,
    /// 1-based complete binary tree; `depth_map[n]` is the shallowest depth
    /// of a free run under `n`, or `max_order + 1` when the subtree is
    /// fully allocated. Index 0 is unused.
    depth_map: Vec<u8>,
    /// Bitmap sub-allocators, keyed by the leaf node of their claimed page.
    subpages: HashMap<u32, Subpage>,
    /// Per sub-page class: pages that still have a free element.
    avail_subpages: Vec<Vec<u32>>,
    /// Neighbor links within the owning tier list (chunk-store indices).
    pub(crate) prev: Option<u32>,
    pub(crate) next: Option<u32>,
    /// Tier currently owning this chunk.
    pub(crate) owner: Option<usize>,
}

impl Chunk {
    /// Wraps a slab of exactly `page_size << max_order` bytes.
    pub fn new(slab: Slab, page_size: usize, max_order: u32, subpage_classes: usize) -> Self {
        let capacity = slab.capacity();
        assert!(page_size.is_power_of_two(), "page size must be a power of two");
        assert_eq!(
            capacity,
            page_size << max_order,
            "slab capacity does not match the buddy geometry"
        );

        let nodes = 1usize << (max_order + 1);
        let mut depth_map = vec![0u8; nodes];
        for (node, value) in depth_map.iter_mut().enumerate().skip(1) {
            *value = depth_of(node as u32) as u8;
        }

        Self {
            slab,
            page_size,
            max_order,
            capacity,
            free_bytes: capacity,
            depth_map,
            subpages: HashMap::new(),
            avail_subpages: vec![Vec::new(); subpage_classes],
            prev: None,
            next: None,
            owner: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bytes_free(&self) -> usize {
        self.free_bytes
    }

    /// Percentage of the chunk currently allocated, floor-rounded on the
    /// free side: `100 - floor(bytes_free * 100 / capacity)`.
    pub fn usage(&self) -> u8 {
        (100 - self.free_bytes * 100 / self.capacity) as u8
    }

    /// Attempts an in-place allocation of one canonical size class.
    ///
    /// Fails only when no run (or sub-page element) of the required size is
    /// free anywhere in the chunk; capacity-category mismatches are filtered
    /// by the tier before the chunk is asked.
    pub(crate) fn allocate(
        &mut self,
        class_index: u16,
        class_size: usize,
        subpage: bool,
    ) -> Option<ChunkAlloc> {
        if subpage {
            self.allocate_subpage(class_index, class_size)
        } else {
            self.allocate_normal(class_size)
        }
    }

    /// Releases a previously granted region. `len` must be the canonical
    /// size the region was allocated with.
    pub(crate) fn free(&mut self, region: RunRef, len: usize) {
        match region {
            RunRef::Run { node } => {
                let size = self.run_size(depth_of(node));
                assert_eq!(size, len, "freed length does not match the run size");
                self.free_run(node);
                self.free_bytes += size;
            }
            RunRef::Subpage { node, bit } => {
                let subpage = self
                    .subpages
                    .get_mut(&node)
                    .expect("free into a page with no sub-allocator");
                assert_eq!(
                    subpage.elem_size(),
                    len,
                    "freed length does not match the page's size class"
                );
                let was_full = subpage.is_full();
                subpage.free(bit);
                let class = subpage.class_index() as usize;
                if subpage.num_used() == 0 {
                    // Last element: hand the page back to the run allocator.
                    self.subpages.remove(&node);
                    self.avail_subpages[class].retain(|&n| n != node);
                    self.free_run(node);
                    self.free_bytes += self.page_size;
                } else if was_full {
                    self.avail_subpages[class].push(node);
                }
            }
        }
    }

    fn allocate_normal(&mut self, class_size: usize) -> Option<ChunkAlloc> {
        debug_assert!(class_size.is_power_of_two() && class_size >= self.page_size);
        if class_size > self.capacity {
            return None;
        }
        let order = (class_size / self.page_size).trailing_zeros();
        let node = self.allocate_run(self.max_order - order)?;
        self.free_bytes -= class_size;
        Some(ChunkAlloc {
            region: RunRef::Run { node },
            offset: self.run_offset(node),
        })
    }

    fn allocate_subpage(&mut self, class_index: u16, elem_size: usize) -> Option<ChunkAlloc> {
        let class = class_index as usize;
        if let Some(&node) = self.avail_subpages[class].last() {
            let page_offset = self.run_offset(node);
            let subpage = self
                .subpages
                .get_mut(&node)
                .expect("listed page has no sub-allocator");
            let bit = subpage.allocate().expect("listed page has no free element");
            if subpage.is_full() {
                self.avail_subpages[class].pop();
            }
            return Some(ChunkAlloc {
                region: RunRef::Subpage { node, bit },
                offset: page_offset + bit as usize * elem_size,
            });
        }

        // Claim a fresh page from the run allocator for this class.
        let node = self.allocate_run(self.max_order)?;
        self.free_bytes -= self.page_size;
        let mut subpage = Subpage::new(class_index, elem_size, self.page_size);
        let bit = subpage.allocate().expect("fresh page has a free element");
        let full = subpage.is_full();
        self.subpages.insert(node, subpage);
        if !full {
            self.avail_subpages[class].push(node);
        }
        Some(ChunkAlloc {
            region: RunRef::Subpage { node, bit },
            offset: self.run_offset(node) + bit as usize * elem_size,
        })
    }

    /// Finds and claims an entirely free run at `depth`.
    fn allocate_run(&mut self, depth: u32) -> Option<u32> {
        if u32::from(self.depth_map[1]) > depth {
            return None;
        }
        let mut node = 1u32;
        for _ in 0..depth {
            node <<= 1;
            if u32::from(self.depth_map[node as usize]) > depth {
                node ^= 1;
            }
        }
        debug_assert_eq!(u32::from(self.depth_map[node as usize]), depth);
        self.depth_map[node as usize] = self.unusable();
        self.update_parents_after_alloc(node);
        Some(node)
    }

    fn free_run(&mut self, node: u32) {
        assert_eq!(
            self.depth_map[node as usize],
            self.unusable(),
            "freeing a run that is not allocated"
        );
        self.depth_map[node as usize] = depth_of(node) as u8;
        let mut cur = node;
        while cur > 1 {
            let parent = cur >> 1;
            let parent_depth = depth_of(parent) as u8;
            let left = self.depth_map[(parent << 1) as usize];
            let right = self.depth_map[(parent << 1 | 1) as usize];
            // Two entirely free buddies merge back into their parent run.
            self.depth_map[parent as usize] =
                if left == parent_depth + 1 && right == parent_depth + 1 {
                    parent_depth
                } else {
                    left.min(right)
                };
            cur = parent;
        }
    }

    fn update_parents_after_alloc(&mut self, mut node: u32) {
        while node > 1 {
            node >>= 1;
            let left = self.depth_map[(node << 1) as usize];
            let right = self.depth_map[(node << 1 | 1) as usize];
            self.depth_map[node as usize] = left.min(right);
        }
    }

    fn unusable(&self) -> u8 {
        (self.max_order + 1) as u8
    }

    fn run_size(&self, depth: u32) -> usize {
        self.capacity >> depth
    }

    fn run_offset(&self, node: u32) -> usize {
        let depth = depth_of(node);
        (node as usize - (1usize << depth)) * self.run_size(depth)
    }

    pub(crate) fn slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.slab.as_slice()[offset..offset + len]
    }

    pub(crate) fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.slab.as_mut_slice()[offset..offset + len]
    }

    pub(crate) fn into_slab(self) -> Slab {
        self.slab
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("capacity", &self.capacity)
            .field("free_bytes", &self.free_bytes)
            .field("usage", &self.usage())
            .finish()
    }
}

/// Bitmap sub-allocator over one claimed page, dedicated to one size class.
#[derive(Debug)]
struct Subpage {
    class_index: u16,
    elem_size: usize,
    bitmap: Vec<u64>,
    max_elems: u32,
    used: u32,
}

impl Subpage {
    fn new(class_index: u16, elem_size: usize, page_size: usize) -> Self {
        let max_elems = (page_size / elem_size) as u32;
        debug_assert!(max_elems >= 1);
        Self {
            class_index,
            elem_size,
            bitmap: vec![0u64; max_elems.div_ceil(64) as usize],
            max_elems,
            used: 0,
        }
    }

    fn allocate(&mut self) -> Option<u32> {
        if self.used == self.max_elems {
            return None;
        }
        for (word_index, word) in self.bitmap.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = (!*word).trailing_zeros();
                let index = word_index as u32 * 64 + bit;
                debug_assert!(index < self.max_elems);
                *word |= 1u64 << bit;
                self.used += 1;
                return Some(index);
            }
        }
        None
    }

    fn free(&mut self, bit: u32) {
        assert!(bit < self.max_elems, "subpage element out of range");
        let word = &mut self.bitmap[(bit / 64) as usize];
        let mask = 1u64 << (bit % 64);
        assert!(*word & mask != 0, "freeing an unallocated subpage element");
        *word &= !mask;
        self.used -= 1;
    }

    fn is_full(&self) -> bool {
        self.used == self.max_elems
    }

    fn num_used(&self) -> u32 {
        self.used
    }

    fn class_index(&self) -> u16 {
        self.class_index
    }

    fn elem_size(&self) -> usize {
        self.elem_size
    }
}
