//! Read-only observability surface.
//!
//! Snapshots are taken under the arena lock, so tier membership and
//! per-chunk occupancy are mutually consistent. All types serialize with
//! serde for export to external tooling.

use serde::Serialize;

/// Cumulative allocator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Handles issued, pooled and huge.
    pub allocations: u64,
    /// Handles released, pooled and huge.
    pub frees: u64,
    /// Chunks created on chain exhaustion.
    pub chunks_created: u64,
    /// Chunks destroyed after draining to usage 0 (or at shutdown).
    pub chunks_destroyed: u64,
    /// Allocations that bypassed pooling entirely.
    pub huge_allocations: u64,
    /// Canonical bytes currently handed out.
    pub live_bytes: usize,
}

/// Occupancy of one chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkMetrics {
    pub usage: u8,
    pub capacity: usize,
    pub free_bytes: usize,
}

/// One tier of the chain with its chunks, head first.
#[derive(Debug, Clone, Serialize)]
pub struct TierMetrics {
    /// Lower usage bound, clamped to at least 1.
    pub min_usage: u8,
    /// Upper usage bound, clamped to at most 100.
    pub max_usage: u8,
    pub chunks: Vec<ChunkMetrics>,
}

/// Consistent snapshot of one arena: the init pre-tier first, then the
/// bands in increasing-usage order.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    pub tiers: Vec<TierMetrics>,
    pub stats: PoolStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_to_json() {
        let metrics = PoolMetrics {
            tiers: vec![TierMetrics {
                min_usage: 1,
                max_usage: 25,
                chunks: vec![ChunkMetrics {
                    usage: 10,
                    capacity: 16384,
                    free_bytes: 14746,
                }],
            }],
            stats: PoolStats::default(),
        };
        let json = serde_json::to_string(&metrics).unwrap();
        assert!(json.contains("\"min_usage\":1"));
        assert!(json.contains("\"free_bytes\":14746"));
        assert!(json.contains("\"allocations\":0"));
    }
}
