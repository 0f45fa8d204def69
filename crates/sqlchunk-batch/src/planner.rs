//! Chunk planning
//!
//! Splits an ordered pending queue into bounded, order-preserving chunks.

use std::collections::VecDeque;
use std::num::NonZeroUsize;

/// A contiguous slice of the pending queue, executed as one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    /// Zero-based position of this chunk in emission order
    pub index: usize,
    /// Position of the chunk's first item in the original sequence
    pub offset: usize,
    /// Items in original order
    pub items: Vec<T>,
}

impl<T> Chunk<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Original-sequence index of the item at `position` in this chunk.
    pub fn global_index(&self, position: usize) -> usize {
        self.offset + position
    }
}

/// Takes chunks of at most `chunk_size` items off the front of a queue.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    chunk_size: NonZeroUsize,
    next_index: usize,
    next_offset: usize,
}

impl ChunkPlanner {
    pub fn new(chunk_size: NonZeroUsize) -> Self {
        Self {
            chunk_size,
            next_index: 0,
            next_offset: 0,
        }
    }

    pub fn chunk_size(&self) -> NonZeroUsize {
        self.chunk_size
    }

    /// Index the next emitted chunk will carry.
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// Remove the first `min(chunk_size, pending.len())` items from `pending`
    /// and return them as a chunk. The remainder stays in `pending`.
    /// Returns `None` once the queue is empty.
    pub fn take<T>(&mut self, pending: &mut VecDeque<T>) -> Option<Chunk<T>> {
        if pending.is_empty() {
            return None;
        }

        let count = self.chunk_size.get().min(pending.len());
        let items: Vec<T> = pending.drain(..count).collect();
        let chunk = Chunk {
            index: self.next_index,
            offset: self.next_offset,
            items,
        };

        self.next_index += 1;
        self.next_offset += count;
        Some(chunk)
    }
}

/// Split a whole sequence into chunks up front.
pub fn plan_chunks<T>(items: impl IntoIterator<Item = T>, chunk_size: NonZeroUsize) -> Vec<Chunk<T>> {
    let mut pending: VecDeque<T> = items.into_iter().collect();
    let mut planner = ChunkPlanner::new(chunk_size);
    let mut chunks = Vec::new();
    while let Some(chunk) = planner.take(&mut pending) {
        chunks.push(chunk);
    }
    chunks
}
