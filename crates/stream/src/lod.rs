use emberfall_common::{ArchetypeId, ChunkCoord};
use glam::Vec2;
use std::collections::BTreeMap;

/// Coarse stand-in for an entity of an unloaded chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodSummary {
    pub archetype: ArchetypeId,
    pub position: Vec2,
}

/// Summaries of recently unloaded chunks near players.
#[derive(Debug, Default)]
pub struct LodCache {
    chunks: BTreeMap<ChunkCoord, Vec<LodSummary>>,
}

impl LodCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, coord: ChunkCoord, summaries: Vec<LodSummary>) {
        self.chunks.insert(coord, summaries);
    }

    pub fn get(&self, coord: ChunkCoord) -> Option<&[LodSummary]> {
        self.chunks.get(&coord).map(Vec::as_slice)
    }

    pub fn remove(&mut self, coord: ChunkCoord) -> Option<Vec<LodSummary>> {
        self.chunks.remove(&coord)
    }

    /// Drops every chunk for which `keep` is false.
    pub fn retain(&mut self, mut keep: impl FnMut(ChunkCoord) -> bool) -> usize {
        let before = self.chunks.len();
        self.chunks.retain(|coord, _| keep(*coord));
        before - self.chunks.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChunkCoord, &[LodSummary])> {
        self.chunks.iter().map(|(c, s)| (*c, s.as_slice()))
    }

    /// Number of chunks with summaries.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
