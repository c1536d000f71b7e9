//! Allocation failure taxonomy.
//!
//! Only two conditions surface to callers: a request that no pooled chunk
//! could ever host, and backing-store exhaustion. A tier with no space and a
//! fully exhausted chain are internal control flow (the next tier is tried,
//! or a new chunk is created). Invariant violations such as freeing a stale
//! handle panic instead of returning an error, since they indicate corrupted
//! pool state.

use thiserror::Error;

/// Why an allocation request could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The canonical size for this request exceeds what any tier could ever
    /// provide. The caller may fall back to
    /// [`Arena::allocate_unpooled`](crate::arena::Arena::allocate_unpooled).
    #[error(
        "request for {requested} bytes (canonical {normalized}) exceeds pooled capacity {max_pooled}"
    )]
    CapacityExceeded {
        /// Bytes originally requested.
        requested: usize,
        /// Canonical size-class bytes the request was rounded to.
        normalized: usize,
        /// Largest canonical size any tier can host.
        max_pooled: usize,
    },
    /// The backing store could not provide a slab of the required capacity.
    #[error("backing store could not provide a {capacity}-byte slab")]
    SlabExhausted {
        /// Slab capacity that was requested from the backing store.
        capacity: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = AllocError::CapacityExceeded {
            requested: 4_100_000,
            normalized: 4_194_304,
            max_pooled: 4_152_360,
        };
        let text = err.to_string();
        assert!(text.contains("4100000"));
        assert!(text.contains("exceeds pooled capacity"));

        let err = AllocError::SlabExhausted { capacity: 4_194_304 };
        assert!(err.to_string().contains("4194304-byte slab"));
    }
}
