//! Size classes for pooled allocations.
//!
//! Maps a requested byte count to a canonical size-class index and back.
//! Classes follow the pool geometry: tiny classes in 16-byte steps below
//! 512, small classes doubling from 512 up to the page size, and normal
//! classes doubling from the page size up to the chunk size. Requests above
//! the chunk size have no class and take the unpooled (huge) path.

/// Smallest canonical allocation size (bytes).
pub const MIN_TINY: usize = 16;

/// Spacing of the tiny classes (bytes).
pub const TINY_STEP: usize = 16;

/// First small class; tiny classes stop just below this.
pub const SMALL_MIN: usize = 512;

/// Which region of the class table an index falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeKind {
    /// Below 512 bytes, 16-byte steps. Served from page-local bitmaps.
    Tiny,
    /// 512 bytes up to (exclusive) the page size. Also bitmap-served.
    Small,
    /// One page up to the chunk size. Served as buddy runs.
    Normal,
}

/// Canonical size-class table for one pool geometry.
///
/// All capacity comparisons in the pool are made against canonical sizes,
/// never against raw request sizes.
#[derive(Debug, Clone)]
pub struct SizeClassTable {
    sizes: Vec<usize>,
    page_size: usize,
    chunk_size: usize,
    subpage_classes: usize,
}

impl SizeClassTable {
    /// Builds the table for the given geometry. Both sizes must be powers
    /// of two with `page_size <= chunk_size`.
    pub fn new(page_size: usize, chunk_size: usize) -> Self {
        assert!(
            page_size.is_power_of_two() && chunk_size.is_power_of_two(),
            "pool geometry must be power-of-two sized"
        );
        assert!(page_size >= SMALL_MIN * 2, "page too small for sub-page classes");
        assert!(chunk_size >= page_size, "chunk smaller than one page");

        let mut sizes = Vec::new();
        let mut size = MIN_TINY;
        while size < SMALL_MIN {
            sizes.push(size);
            size += TINY_STEP;
        }
        let mut size = SMALL_MIN;
        while size < page_size {
            sizes.push(size);
            size <<= 1;
        }
        let subpage_classes = sizes.len();
        let mut size = page_size;
        while size <= chunk_size {
            sizes.push(size);
            size <<= 1;
        }

        Self {
            sizes,
            page_size,
            chunk_size,
            subpage_classes,
        }
    }

    /// Canonical class index for a request, or `None` when the request is
    /// larger than any class (the huge path). Zero-byte requests round up
    /// to the smallest class.
    pub fn class_of(&self, bytes: usize) -> Option<usize> {
        let bytes = bytes.max(1);
        if bytes > self.chunk_size {
            return None;
        }
        Some(match self.sizes.binary_search(&bytes) {
            Ok(index) => index,
            Err(index) => index,
        })
    }

    /// Canonical byte size of a class. Always at least the request it was
    /// derived from.
    pub fn byte_size_of(&self, index: usize) -> usize {
        self.sizes[index]
    }

    /// True when the class is served by a page-local bitmap sub-allocator
    /// rather than a buddy run.
    pub fn is_subpage(&self, index: usize) -> bool {
        index < self.subpage_classes
    }

    /// Region of the table an index falls in.
    pub fn kind_of(&self, index: usize) -> SizeKind {
        let size = self.sizes[index];
        if size < SMALL_MIN {
            SizeKind::Tiny
        } else if size < self.page_size {
            SizeKind::Small
        } else {
            SizeKind::Normal
        }
    }

    /// Total number of classes.
    pub fn num_classes(&self) -> usize {
        self.sizes.len()
    }

    /// Number of classes strictly below the page size.
    pub fn num_subpage_classes(&self) -> usize {
        self.subpage_classes
    }

    /// Page size of the geometry this table was built for.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Chunk size of the geometry this table was built for.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SizeClassTable {
        SizeClassTable::new(4096, 16384)
    }

    #[test]
    fn test_class_of_min() {
        let t = table();
        assert_eq!(t.class_of(0), Some(0));
        assert_eq!(t.class_of(1), Some(0));
        assert_eq!(t.class_of(16), Some(0));
    }

    #[test]
    fn test_class_of_round_up() {
        let t = table();
        assert_eq!(t.byte_size_of(t.class_of(17).unwrap()), 32);
        assert_eq!(t.byte_size_of(t.class_of(500).unwrap()), 512);
        assert_eq!(t.byte_size_of(t.class_of(513).unwrap()), 1024);
        assert_eq!(t.byte_size_of(t.class_of(4097).unwrap()), 8192);
    }

    #[test]
    fn test_class_of_huge() {
        let t = table();
        assert_eq!(t.class_of(16384), Some(t.num_classes() - 1));
        assert_eq!(t.class_of(16385), None);
    }

    #[test]
    fn test_roundtrip() {
        let t = table();
        for index in 0..t.num_classes() {
            let size = t.byte_size_of(index);
            assert_eq!(t.class_of(size), Some(index));
        }
    }

    #[test]
    fn test_monotonic() {
        let t = table();
        for index in 1..t.num_classes() {
            assert!(t.byte_size_of(index) > t.byte_size_of(index - 1));
        }
    }

    #[test]
    fn test_kinds_and_subpage_boundary() {
        let t = table();
        let tiny = t.class_of(16).unwrap();
        let small = t.class_of(512).unwrap();
        let normal = t.class_of(4096).unwrap();
        assert_eq!(t.kind_of(tiny), SizeKind::Tiny);
        assert_eq!(t.kind_of(small), SizeKind::Small);
        assert_eq!(t.kind_of(normal), SizeKind::Normal);
        assert!(t.is_subpage(tiny));
        assert!(t.is_subpage(small));
        assert!(!t.is_subpage(normal));
        assert_eq!(t.num_subpage_classes(), normal);
    }

    #[test]
    fn test_tiny_step_layout() {
        let t = table();
        // 16, 32, .., 496 then 512, 1024, 2048.
        assert_eq!(t.byte_size_of(1), 32);
        assert_eq!(t.byte_size_of(30), 496);
        assert_eq!(t.byte_size_of(31), 512);
        assert_eq!(t.num_subpage_classes(), 34);
    }
}
