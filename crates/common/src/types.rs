use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Simulation tick counter. Tick 0 is the state before the first step.
pub type Tick = u64;

/// Network connection identifier, assigned by the server on join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

/// Identifier of an archetype template in the asset catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchetypeId(pub u16);

/// Identifier of a static chunk geometry in the asset catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeometryId(pub u32);

/// Identifier of a behavior tree in the behavior library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BehaviorId(pub u16);

/// A chunk coordinate on the world plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
}

impl ChunkCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared distance in chunk units. Used for nearest-first ordering.
    pub fn distance_sq(self, other: ChunkCoord) -> u64 {
        let dx = (self.x as i64 - other.x as i64).unsigned_abs();
        let dy = (self.y as i64 - other.y as i64).unsigned_abs();
        dx * dx + dy * dy
    }
}

/// A tile coordinate in global tile space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance in tiles.
    pub fn manhattan(self, other: TileCoord) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// The four edge-adjacent neighbours in a fixed order (E, W, S, N).
    pub fn neighbors4(self) -> [TileCoord; 4] {
        [
            TileCoord::new(self.x + 1, self.y),
            TileCoord::new(self.x - 1, self.y),
            TileCoord::new(self.x, self.y + 1),
            TileCoord::new(self.x, self.y - 1),
        ]
    }
}

/// World grid geometry: how large a tile is and how many tiles make a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldScale {
    /// Edge length of one tile in world units.
    pub tile_size: f32,
    /// Tiles per chunk edge.
    pub chunk_tiles: u32,
}

impl Default for WorldScale {
    fn default() -> Self {
        Self {
            tile_size: 1.0,
            chunk_tiles: 32,
        }
    }
}

impl WorldScale {
    /// Edge length of one chunk in world units.
    pub fn chunk_extent(&self) -> f32 {
        self.tile_size * self.chunk_tiles as f32
    }

    /// The chunk containing a world position.
    pub fn chunk_of(&self, pos: Vec2) -> ChunkCoord {
        let extent = self.chunk_extent();
        ChunkCoord {
            x: (pos.x / extent).floor() as i32,
            y: (pos.y / extent).floor() as i32,
        }
    }

    /// The tile containing a world position.
    pub fn tile_of(&self, pos: Vec2) -> TileCoord {
        TileCoord {
            x: (pos.x / self.tile_size).floor() as i32,
            y: (pos.y / self.tile_size).floor() as i32,
        }
    }

    /// The chunk a tile belongs to.
    pub fn chunk_of_tile(&self, tile: TileCoord) -> ChunkCoord {
        let n = self.chunk_tiles as i32;
        ChunkCoord {
            x: tile.x.div_euclid(n),
            y: tile.y.div_euclid(n),
        }
    }

    /// Tile position local to its chunk, as `(column, row)`.
    pub fn local_tile(&self, tile: TileCoord) -> (u32, u32) {
        let n = self.chunk_tiles as i32;
        (tile.x.rem_euclid(n) as u32, tile.y.rem_euclid(n) as u32)
    }

    /// World-space center of a tile.
    pub fn tile_center(&self, tile: TileCoord) -> Vec2 {
        Vec2::new(
            (tile.x as f32 + 0.5) * self.tile_size,
            (tile.y as f32 + 0.5) * self.tile_size,
        )
    }

    /// World-space minimum corner of a chunk.
    pub fn chunk_origin(&self, chunk: ChunkCoord) -> Vec2 {
        let extent = self.chunk_extent();
        Vec2::new(chunk.x as f32 * extent, chunk.y as f32 * extent)
    }

    /// Whether a circle intersects the chunk rectangle.
    pub fn circle_intersects_chunk(&self, center: Vec2, radius: f32, chunk: ChunkCoord) -> bool {
        let min = self.chunk_origin(chunk);
        let max = min + Vec2::splat(self.chunk_extent());
        let closest = center.clamp(min, max);
        center.distance_squared(closest) <= radius * radius
    }

    /// All chunks whose rectangle intersects the circle, in row-major order.
    pub fn chunks_in_circle(&self, center: Vec2, radius: f32) -> Vec<ChunkCoord> {
        let lo = self.chunk_of(center - Vec2::splat(radius));
        let hi = self.chunk_of(center + Vec2::splat(radius));
        let mut out = Vec::new();
        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                let coord = ChunkCoord::new(x, y);
                if self.circle_intersects_chunk(center, radius, coord) {
                    out.push(coord);
                }
            }
        }
        out
    }
}
