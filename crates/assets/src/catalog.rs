use crate::geometry::ChunkGeometry;
use emberfall_common::{ArchetypeId, ChunkCoord, DetRng, GeometryId, WorldScale, splitmix64};
use emberfall_ecs::{ArchetypeKind, ArchetypeTemplate, EcsError};
use glam::Vec2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Errors from building or loading a catalog. All of them are fatal at
/// startup.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Archetype(#[from] EcsError),
    #[error("malformed geometry '{name}': {reason}")]
    MalformedGeometry { name: String, reason: String },
    #[error("duplicate {what} id {id}")]
    Duplicate { what: &'static str, id: u32 },
    #[error("unknown geometry {0:?}")]
    UnknownGeometry(GeometryId),
    #[error("unknown archetype {0:?} referenced by {1}")]
    UnknownArchetype(ArchetypeId, &'static str),
}

/// An authored spawn inside a seeded chunk. `tile` is local to the chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedSpawn {
    pub archetype: ArchetypeId,
    pub tile: (u32, u32),
    /// Patrol waypoints as local tiles.
    #[serde(default)]
    pub patrol: Vec<(u32, u32)>,
}

/// Hand-authored content for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSeed {
    pub coord: ChunkCoord,
    pub geometry: GeometryId,
    #[serde(default)]
    pub spawns: Vec<SeedSpawn>,
}

/// Procedural population for chunks without a seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationRule {
    pub archetype: ArchetypeId,
    /// Chance per chunk, in per-mille, that one instance is placed.
    pub per_mille: u32,
}

/// World-space layout of a chunk on first visit.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkBlueprint {
    pub coord: ChunkCoord,
    pub geometry: GeometryId,
    pub spawns: Vec<BlueprintSpawn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlueprintSpawn {
    pub archetype: ArchetypeId,
    pub position: Vec2,
    pub patrol: Vec<Vec2>,
    /// Seed for the entity's decision RNG.
    pub rng_seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    scale: WorldScale,
    archetypes: Vec<ArchetypeTemplate>,
    geometries: Vec<ChunkGeometry>,
    /// Geometries drawn from for unseeded chunks, by position hash.
    geometry_pool: Vec<GeometryId>,
    #[serde(default)]
    seeds: Vec<ChunkSeed>,
    #[serde(default)]
    population: Vec<PopulationRule>,
}

/// Validated, immutable content available to the simulation.
#[derive(Debug, Clone)]
pub struct AssetCatalog {
    scale: WorldScale,
    archetypes: BTreeMap<ArchetypeId, ArchetypeTemplate>,
    geometries: BTreeMap<GeometryId, Arc<ChunkGeometry>>,
    geometry_pool: Vec<GeometryId>,
    seeds: BTreeMap<ChunkCoord, ChunkSeed>,
    population: Vec<PopulationRule>,
}

impl AssetCatalog {
    pub fn new(
        scale: WorldScale,
        archetypes: Vec<ArchetypeTemplate>,
        geometries: Vec<ChunkGeometry>,
        geometry_pool: Vec<GeometryId>,
        seeds: Vec<ChunkSeed>,
        population: Vec<PopulationRule>,
    ) -> Result<Self, AssetError> {
        let mut catalog = Self {
            scale,
            archetypes: BTreeMap::new(),
            geometries: BTreeMap::new(),
            geometry_pool,
            seeds: BTreeMap::new(),
            population,
        };
        for template in archetypes {
            template.validate()?;
            let id = template.id;
            if catalog.archetypes.insert(id, template).is_some() {
                return Err(AssetError::Duplicate {
                    what: "archetype",
                    id: id.0 as u32,
                });
            }
        }
        for geometry in geometries {
            if geometry.size() != scale.chunk_tiles {
                return Err(AssetError::MalformedGeometry {
                    name: geometry.name.clone(),
                    reason: format!(
                        "size {} does not match chunk_tiles {}",
                        geometry.size(),
                        scale.chunk_tiles
                    ),
                });
            }
            let id = geometry.id;
            if catalog.geometries.insert(id, Arc::new(geometry)).is_some() {
                return Err(AssetError::Duplicate {
                    what: "geometry",
                    id: id.0,
                });
            }
        }
        catalog.validate_references(seeds)?;
        tracing::info!(
            archetypes = catalog.archetypes.len(),
            geometries = catalog.geometries.len(),
            seeds = catalog.seeds.len(),
            "asset catalog ready"
        );
        Ok(catalog)
    }

    fn validate_references(&mut self, seeds: Vec<ChunkSeed>) -> Result<(), AssetError> {
        if self.geometry_pool.is_empty() {
            return Err(AssetError::MalformedGeometry {
                name: "geometry_pool".into(),
                reason: "pool is empty".into(),
            });
        }
        for g in &self.geometry_pool {
            if !self.geometries.contains_key(g) {
                return Err(AssetError::UnknownGeometry(*g));
            }
        }
        for rule in &self.population {
            match self.archetypes.get(&rule.archetype) {
                Some(t) if t.kind != ArchetypeKind::Player => {}
                _ => return Err(AssetError::UnknownArchetype(rule.archetype, "population rule")),
            }
        }
        for seed in seeds {
            if !self.geometries.contains_key(&seed.geometry) {
                return Err(AssetError::UnknownGeometry(seed.geometry));
            }
            for spawn in &seed.spawns {
                if !self.archetypes.contains_key(&spawn.archetype) {
                    return Err(AssetError::UnknownArchetype(spawn.archetype, "chunk seed"));
                }
            }
            self.seeds.insert(seed.coord, seed);
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, AssetError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Self::new(
            file.scale,
            file.archetypes,
            file.geometries,
            file.geometry_pool,
            file.seeds,
            file.population,
        )
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&data)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AssetError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &self.to_file())?;
        Ok(())
    }

    fn to_file(&self) -> CatalogFile {
        CatalogFile {
            scale: self.scale,
            archetypes: self.archetypes.values().cloned().collect(),
            geometries: self.geometries.values().map(|g| (**g).clone()).collect(),
            geometry_pool: self.geometry_pool.clone(),
            seeds: self.seeds.values().cloned().collect(),
            population: self.population.clone(),
        }
    }

    pub fn scale(&self) -> WorldScale {
        self.scale
    }

    pub fn archetype(&self, id: ArchetypeId) -> Option<&ArchetypeTemplate> {
        self.archetypes.get(&id)
    }

    pub fn archetypes(&self) -> impl Iterator<Item = &ArchetypeTemplate> {
        self.archetypes.values()
    }

    pub fn archetype_by_name(&self, name: &str) -> Option<&ArchetypeTemplate> {
        self.archetypes.values().find(|t| t.name == name)
    }

    pub fn geometry(&self, id: GeometryId) -> Option<Arc<ChunkGeometry>> {
        self.geometries.get(&id).cloned()
    }

    pub fn seed(&self, coord: ChunkCoord) -> Option<&ChunkSeed> {
        self.seeds.get(&coord)
    }

    /// Layout of a chunk that has never been saved. Seeded chunks use their
    /// authored content; others pick geometry and population from a hash of
    /// the coordinate and `world_seed`.
    pub fn blueprint(&self, coord: ChunkCoord, world_seed: u64) -> ChunkBlueprint {
        let origin = self.scale.chunk_origin(coord);
        let tile_center = |(c, r): (u32, u32)| {
            origin + Vec2::new((c as f32 + 0.5) * self.scale.tile_size, (r as f32 + 0.5) * self.scale.tile_size)
        };
        let chunk_seed = splitmix64(world_seed ^ (((coord.x as u32 as u64) << 32) | coord.y as u32 as u64));
        let mut rng = DetRng::new(chunk_seed);

        if let Some(seed) = self.seeds.get(&coord) {
            let spawns = seed
                .spawns
                .iter()
                .map(|s| BlueprintSpawn {
                    archetype: s.archetype,
                    position: tile_center(s.tile),
                    patrol: s.patrol.iter().map(|t| tile_center(*t)).collect(),
                    rng_seed: rng.next_u64(),
                })
                .collect();
            return ChunkBlueprint {
                coord,
                geometry: seed.geometry,
                spawns,
            };
        }

        let geometry_id = self.geometry_pool[rng.below(self.geometry_pool.len() as u32) as usize];
        let mut spawns = Vec::new();
        if let Some(geometry) = self.geometries.get(&geometry_id) {
            for rule in &self.population {
                if rng.below(1000) >= rule.per_mille {
                    continue;
                }
                // A few attempts at a floor tile; a chunk that is mostly wall
                // may simply stay empty.
                for _ in 0..8 {
                    let tile = (
                        rng.below(self.scale.chunk_tiles),
                        rng.below(self.scale.chunk_tiles),
                    );
                    if !geometry.is_solid(tile.0, tile.1) {
                        spawns.push(BlueprintSpawn {
                            archetype: rule.archetype,
                            position: tile_center(tile),
                            patrol: Vec::new(),
                            rng_seed: rng.next_u64(),
                        });
                        break;
                    }
                }
            }
        }
        ChunkBlueprint {
            coord,
            geometry: geometry_id,
            spawns,
        }
    }

    /// SHA-256 over geometry tiles and archetype templates, as hex.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for g in self.geometries.values() {
            hasher.update(g.id.0.to_le_bytes());
            hasher.update(g.tiles().iter().map(|t| t.to_char() as u8).collect::<Vec<_>>());
        }
        if let Ok(json) = serde_json::to_vec(&self.archetypes.values().collect::<Vec<_>>()) {
            hasher.update(json);
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}
