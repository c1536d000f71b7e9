//! Backing memory source.
//!
//! Chunks draw their slabs from a [`SlabSource`] so tests can substitute
//! counting or failing sources without touching the arena. The default
//! source takes zeroed boxed regions from the global allocator, fallibly:
//! backing-store exhaustion is an `Option::None`, never an abort.

/// An owned contiguous byte region backing one chunk or one huge
/// allocation.
#[derive(Debug)]
pub struct Slab {
    data: Box<[u8]>,
}

impl Slab {
    /// Wraps an already-allocated region.
    pub fn from_boxed(data: Box<[u8]>) -> Self {
        Self { data }
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Read access to the whole region.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Write access to the whole region.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Provider of raw slabs for chunks and huge allocations.
pub trait SlabSource: Send {
    /// Provides a zeroed region of exactly `capacity` bytes, or `None` when
    /// the backing store is exhausted.
    fn allocate_slab(&mut self, capacity: usize) -> Option<Slab>;

    /// Returns a region to the backing store.
    fn release_slab(&mut self, slab: Slab);
}

/// Default source: fallible zeroed allocations from the global allocator.
#[derive(Debug, Default)]
pub struct HeapSlabSource;

impl SlabSource for HeapSlabSource {
    fn allocate_slab(&mut self, capacity: usize) -> Option<Slab> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity).ok()?;
        data.resize(capacity, 0);
        Some(Slab::from_boxed(data.into_boxed_slice()))
    }

    fn release_slab(&mut self, slab: Slab) {
        drop(slab);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_source_exact_zeroed() {
        let mut source = HeapSlabSource;
        let slab = source.allocate_slab(4096).unwrap();
        assert_eq!(slab.capacity(), 4096);
        assert!(slab.as_slice().iter().all(|&b| b == 0));
        source.release_slab(slab);
    }

    #[test]
    fn test_slab_write_read() {
        let mut source = HeapSlabSource;
        let mut slab = source.allocate_slab(64).unwrap();
        slab.as_mut_slice()[7] = 0xA5;
        assert_eq!(slab.as_slice()[7], 0xA5);
    }
}
