use emberfall_common::GeometryId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileKind {
    Floor,
    Wall,
    Water,
}

impl TileKind {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '.' => Some(TileKind::Floor),
            '#' => Some(TileKind::Wall),
            '~' => Some(TileKind::Water),
            _ => None,
        }
    }

    pub fn to_char(self) -> char {
        match self {
            TileKind::Floor => '.',
            TileKind::Wall => '#',
            TileKind::Water => '~',
        }
    }

    /// Walls and water block movement and pathing.
    pub fn is_solid(self) -> bool {
        !matches!(self, TileKind::Floor)
    }
}

/// Static tile layout of one chunk, row-major with row 0 at the chunk's
/// minimum y.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GeometryFile", into = "GeometryFile")]
pub struct ChunkGeometry {
    pub id: GeometryId,
    pub name: String,
    size: u32,
    tiles: Vec<TileKind>,
}

/// On-disk form: one string per row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeometryFile {
    id: GeometryId,
    name: String,
    rows: Vec<String>,
}

impl TryFrom<GeometryFile> for ChunkGeometry {
    type Error = String;

    fn try_from(file: GeometryFile) -> Result<Self, String> {
        let rows: Vec<&str> = file.rows.iter().map(String::as_str).collect();
        ChunkGeometry::from_rows(file.id, &file.name, &rows)
    }
}

impl From<ChunkGeometry> for GeometryFile {
    fn from(g: ChunkGeometry) -> Self {
        let rows = g
            .tiles
            .chunks(g.size as usize)
            .map(|row| row.iter().map(|t| t.to_char()).collect())
            .collect();
        GeometryFile {
            id: g.id,
            name: g.name,
            rows,
        }
    }
}

impl ChunkGeometry {
    /// Parses a square layout. `.` is floor, `#` wall, `~` water.
    pub fn from_rows(id: GeometryId, name: &str, rows: &[&str]) -> Result<Self, String> {
        let size = rows.len();
        if size == 0 {
            return Err(format!("geometry '{name}' has no rows"));
        }
        let mut tiles = Vec::with_capacity(size * size);
        for (r, row) in rows.iter().enumerate() {
            let before = tiles.len();
            for c in row.chars() {
                tiles.push(
                    TileKind::from_char(c)
                        .ok_or_else(|| format!("geometry '{name}' row {r}: unknown tile '{c}'"))?,
                );
            }
            if tiles.len() - before != size {
                return Err(format!(
                    "geometry '{name}' row {r} has {} tiles, expected {size}",
                    tiles.len() - before
                ));
            }
        }
        Ok(Self {
            id,
            name: name.to_string(),
            size: size as u32,
            tiles,
        })
    }

    pub fn filled(id: GeometryId, name: &str, size: u32, kind: TileKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            size,
            tiles: vec![kind; (size * size) as usize],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Out-of-range coordinates read as walls.
    pub fn tile(&self, col: u32, row: u32) -> TileKind {
        if col >= self.size || row >= self.size {
            return TileKind::Wall;
        }
        self.tiles[(row * self.size + col) as usize]
    }

    pub fn set(&mut self, col: u32, row: u32, kind: TileKind) {
        if col < self.size && row < self.size {
            self.tiles[(row * self.size + col) as usize] = kind;
        }
    }

    pub fn is_solid(&self, col: u32, row: u32) -> bool {
        self.tile(col, row).is_solid()
    }

    pub fn floor_count(&self) -> usize {
        self.tiles.iter().filter(|t| !t.is_solid()).count()
    }

    pub(crate) fn tiles(&self) -> &[TileKind] {
        &self.tiles
    }
}
