//! # bytepool-core
//!
//! Segregated, usage-tiered pooled memory allocator. Arenas hand out
//! fixed-size byte regions from large pre-allocated chunks instead of going
//! to the system allocator per request; chunks are bucketed into usage
//! tiers and migrate between them as allocations and frees change their
//! occupancy.
//!
//! Layering, leaf first:
//! - [`SizeClassTable`] maps request sizes to canonical classes.
//! - `Chunk` carves one slab with a buddy free tree plus page-local
//!   bitmap sub-allocators for classes below one page.
//! - `ChunkList` buckets chunks by usage band and handles promotion and
//!   demotion across the tier chain.
//! - [`Arena`] wires the chain together behind one mutex, creates chunks on
//!   exhaustion and destroys them when they drain.
//! - [`LocalCache`] is an optional per-thread batching client that
//!   amortizes the arena lock.
//!
//! No `unsafe` code: chunks own their slabs outright and all region access
//! is mediated by the arena.

#![deny(unsafe_code)]

pub mod arena;
pub mod chunk;
pub mod chunk_list;
pub mod config;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod size_class;
pub mod slab;
pub mod store;
pub mod thread_cache;

pub use arena::Arena;
pub use config::{PoolConfig, TierBand};
pub use error::AllocError;
pub use handle::PoolHandle;
pub use metrics::{ChunkMetrics, PoolMetrics, PoolStats, TierMetrics};
pub use size_class::{SizeClassTable, SizeKind};
pub use slab::{HeapSlabSource, Slab, SlabSource};
pub use store::ChunkId;
pub use thread_cache::LocalCache;
