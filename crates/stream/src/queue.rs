use emberfall_common::ChunkCoord;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Chunks awaiting a load request, nearest first.
///
/// Re-enqueueing a chunk with a smaller distance supersedes the old entry;
/// stale heap entries are skipped on dequeue.
#[derive(Debug, Default)]
pub struct LoadQueue {
    heap: BinaryHeap<Reverse<(u64, ChunkCoord)>>,
    pending: HashMap<ChunkCoord, u64>,
}

impl LoadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, coord: ChunkCoord, dist_sq: u64) {
        if self.pending.get(&coord).is_some_and(|old| *old <= dist_sq) {
            return;
        }
        self.pending.insert(coord, dist_sq);
        self.heap.push(Reverse((dist_sq, coord)));
    }

    pub fn dequeue(&mut self) -> Option<(u64, ChunkCoord)> {
        while let Some(Reverse((dist_sq, coord))) = self.heap.pop() {
            if self.pending.get(&coord) == Some(&dist_sq) {
                self.pending.remove(&coord);
                return Some((dist_sq, coord));
            }
        }
        None
    }

    pub fn remove(&mut self, coord: ChunkCoord) {
        self.pending.remove(&coord);
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.pending.contains_key(&coord)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.pending.clear();
    }
}
