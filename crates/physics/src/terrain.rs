use emberfall_assets::ChunkGeometry;
use emberfall_common::{ChunkCoord, TileCoord, WorldScale};
use glam::Vec2;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only view of the walkable world. Only active chunks are present;
/// every tile of an absent chunk reads as solid.
#[derive(Debug, Clone, Default)]
pub struct TerrainView {
    scale: WorldScale,
    chunks: HashMap<ChunkCoord, Arc<ChunkGeometry>>,
}

impl TerrainView {
    pub fn new(scale: WorldScale) -> Self {
        Self {
            scale,
            chunks: HashMap::new(),
        }
    }

    pub fn scale(&self) -> WorldScale {
        self.scale
    }

    pub fn insert(&mut self, coord: ChunkCoord, geometry: Arc<ChunkGeometry>) {
        self.chunks.insert(coord, geometry);
    }

    pub fn remove(&mut self, coord: ChunkCoord) {
        self.chunks.remove(&coord);
    }

    pub fn is_active(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&coord)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn is_solid(&self, tile: TileCoord) -> bool {
        let chunk = self.scale.chunk_of_tile(tile);
        match self.chunks.get(&chunk) {
            Some(geometry) => {
                let (col, row) = self.scale.local_tile(tile);
                geometry.is_solid(col, row)
            }
            None => true,
        }
    }

    /// Whether a circle overlaps any solid tile.
    pub fn circle_blocked(&self, center: Vec2, radius: f32) -> bool {
        let lo = self.scale.tile_of(center - Vec2::splat(radius));
        let hi = self.scale.tile_of(center + Vec2::splat(radius));
        let ts = self.scale.tile_size;
        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                let tile = TileCoord::new(x, y);
                if !self.is_solid(tile) {
                    continue;
                }
                let min = Vec2::new(x as f32 * ts, y as f32 * ts);
                let closest = center.clamp(min, min + Vec2::splat(ts));
                let d = center - closest;
                if d.x * d.x + d.y * d.y < radius * radius {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberfall_assets::TileKind;
    use emberfall_common::GeometryId;

    fn view() -> TerrainView {
        let scale = WorldScale { tile_size: 1.0, chunk_tiles: 4 };
        let mut g = ChunkGeometry::filled(GeometryId(0), "t", 4, TileKind::Floor);
        g.set(2, 1, TileKind::Wall);
        let mut v = TerrainView::new(scale);
        v.insert(ChunkCoord::new(0, 0), Arc::new(g));
        v
    }

    #[test]
    fn absent_chunks_are_solid() {
        let v = view();
        assert!(!v.is_solid(TileCoord::new(0, 0)));
        assert!(v.is_solid(TileCoord::new(2, 1)));
        assert!(v.is_solid(TileCoord::new(4, 0)));
        assert!(v.is_solid(TileCoord::new(-1, 0)));
    }

    #[test]
    fn circle_against_wall() {
        let v = view();
        assert!(!v.circle_blocked(Vec2::new(0.5, 0.5), 0.4));
        assert!(v.circle_blocked(Vec2::new(1.7, 1.5), 0.4));
        // Touching the chunk edge counts as blocked by unloaded space.
        assert!(v.circle_blocked(Vec2::new(0.3, 0.5), 0.4));
    }
}
