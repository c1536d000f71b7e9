//! Pool configuration.
//!
//! Chunk geometry and tier boundaries are configuration data rather than
//! hard-coded constants, so alternate tier layouts can be exercised without
//! code changes. Misconfiguration is a programming error and panics at
//! arena construction.

/// One usage-tier band, in percent of chunk capacity.
///
/// A chunk belongs to the band while its usage lies in
/// `[min_usage, max_usage)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierBand {
    /// Lower usage bound (inclusive).
    pub min_usage: u8,
    /// Upper usage bound (exclusive, except for a closed 100/100 top band).
    pub max_usage: u8,
}

impl TierBand {
    /// Creates a band covering `[min_usage, max_usage)`.
    pub const fn new(min_usage: u8, max_usage: u8) -> Self {
        Self {
            min_usage,
            max_usage,
        }
    }
}

/// Geometry and tier layout for an [`Arena`](crate::arena::Arena).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Run granularity of the buddy allocator. Must be a power of two and
    /// at least 4 KiB (sub-page classes need room below it).
    pub page_size: usize,
    /// Depth of the buddy tree; chunk capacity is `page_size << max_order`.
    pub max_order: u32,
    /// Usage bands in increasing order. The last band is the closed top
    /// tier; the first band's bounds are reused for the init pre-tier.
    pub bands: Vec<TierBand>,
}

impl PoolConfig {
    /// Capacity of one chunk slab in bytes.
    pub fn chunk_size(&self) -> usize {
        self.page_size << self.max_order
    }

    /// Panics unless the configuration describes a valid arena.
    pub(crate) fn validate(&self) {
        assert!(
            self.page_size.is_power_of_two() && self.page_size >= 4096,
            "page_size must be a power of two of at least 4096"
        );
        assert!(self.max_order <= 14, "max_order above 14 is unsupported");
        assert!(!self.bands.is_empty(), "at least one tier band is required");
        for band in &self.bands {
            assert!(
                band.min_usage <= band.max_usage && band.max_usage <= 100,
                "tier band {}..{} is not within 0..=100",
                band.min_usage,
                band.max_usage
            );
        }
        for pair in self.bands.windows(2) {
            assert!(
                pair[1].min_usage == pair[0].max_usage,
                "tier bands must tile contiguously in increasing usage order"
            );
        }
        assert_eq!(
            self.bands.last().map(|b| b.max_usage),
            Some(100),
            "the top tier band must close at 100"
        );
    }
}

impl Default for PoolConfig {
    /// 4 MiB chunks of 8 KiB pages, bucketed into the conventional five
    /// bands covering 0-100%.
    fn default() -> Self {
        Self {
            page_size: 8192,
            max_order: 9,
            bands: vec![
                TierBand::new(0, 25),
                TierBand::new(25, 50),
                TierBand::new(50, 75),
                TierBand::new(75, 100),
                TierBand::new(100, 100),
            ],
        }
    }
}
