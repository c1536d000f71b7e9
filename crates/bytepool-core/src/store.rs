//! Generational chunk table.
//!
//! Chunks live in a slot table and are named by `(slot, generation)` pairs.
//! Tier lists link chunks by slot index, which keeps insert and remove O(1)
//! without a pointer graph, and a stale id (slot freed and reused) fails
//! fast on the generation check instead of corrupting a neighbor chunk.

use crate::chunk::Chunk;

/// Stable identity of one chunk for the lifetime of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Slot table owning every pooled chunk of one arena.
#[derive(Default)]
pub struct ChunkStore {
    slots: Vec<Option<Chunk>>,
    generations: Vec<u32>,
    free: Vec<u32>,
    live: usize,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a chunk into a free slot and returns its id.
    pub fn insert(&mut self, chunk: Chunk) -> ChunkId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(chunk);
            ChunkId {
                index,
                generation: self.generations[index as usize],
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Some(chunk));
            self.generations.push(0);
            ChunkId {
                index,
                generation: 0,
            }
        }
    }

    /// Takes a chunk out of the table, retiring its id. The slot's
    /// generation is bumped so any surviving handle to it fails fast.
    pub fn remove(&mut self, index: u32) -> Chunk {
        let chunk = self.slots[index as usize]
            .take()
            .expect("removing a vacant chunk slot");
        self.generations[index as usize] = self.generations[index as usize].wrapping_add(1);
        self.free.push(index);
        self.live -= 1;
        chunk
    }

    pub fn get(&self, index: u32) -> &Chunk {
        self.slots[index as usize]
            .as_ref()
            .expect("vacant chunk slot")
    }

    pub fn get_mut(&mut self, index: u32) -> &mut Chunk {
        self.slots[index as usize]
            .as_mut()
            .expect("vacant chunk slot")
    }

    /// Looks up a chunk by id, panicking on a generation mismatch (a stale
    /// or foreign handle).
    pub fn resolve(&self, id: ChunkId) -> &Chunk {
        assert_eq!(
            self.generations[id.index as usize], id.generation,
            "stale chunk id: generation mismatch"
        );
        self.get(id.index)
    }

    /// Mutable variant of [`resolve`](Self::resolve), with the same
    /// generation check.
    pub fn resolve_mut(&mut self, id: ChunkId) -> &mut Chunk {
        assert_eq!(
            self.generations[id.index as usize], id.generation,
            "stale chunk id: generation mismatch"
        );
        self.get_mut(id.index)
    }

    /// Current id of the chunk occupying a slot.
    pub fn id_of(&self, index: u32) -> ChunkId {
        debug_assert!(self.slots[index as usize].is_some());
        ChunkId {
            index,
            generation: self.generations[index as usize],
        }
    }

    /// Number of live chunks.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slab::{HeapSlabSource, SlabSource};

    fn chunk() -> Chunk {
        let slab = HeapSlabSource.allocate_slab(16384).unwrap();
        Chunk::new(slab, 4096, 2, 0)
    }

    #[test]
    fn test_insert_remove_reuses_slot() {
        let mut store = ChunkStore::new();
        let a = store.insert(chunk());
        store.remove(a.index);
        assert!(store.is_empty());

        let b = store.insert(chunk());
        assert_eq!(a.index, b.index);
        assert_ne!(a.generation, b.generation);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_resolve_current() {
        let mut store = ChunkStore::new();
        let id = store.insert(chunk());
        assert_eq!(store.resolve(id).capacity(), 16384);
        assert_eq!(store.id_of(id.index), id);
    }

    #[test]
    #[should_panic(expected = "generation mismatch")]
    fn test_resolve_stale_panics() {
        let mut store = ChunkStore::new();
        let id = store.insert(chunk());
        store.remove(id.index);
        store.insert(chunk());
        store.resolve(id);
    }
}
