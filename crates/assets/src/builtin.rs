//! Built-in content used when no catalog file is given.
//!
//! Behavior ids refer to the standard behavior library: 0 idle, 1 melee,
//! 2 villager, 3 guard.

use crate::catalog::{AssetCatalog, AssetError, ChunkSeed, PopulationRule, SeedSpawn};
use crate::geometry::{ChunkGeometry, TileKind};
use emberfall_common::{ArchetypeId, BehaviorId, ChunkCoord, GeometryId, WorldScale};
use emberfall_ecs::*;

pub const PLAYER: ArchetypeId = ArchetypeId(0);
pub const SKELETON: ArchetypeId = ArchetypeId(1);
pub const VILLAGER: ArchetypeId = ArchetypeId(2);
pub const GUARD: ArchetypeId = ArchetypeId(3);
pub const ARROW: ArchetypeId = ArchetypeId(4);
pub const CRATE: ArchetypeId = ArchetypeId(5);
pub const SKELETON_ARCHER: ArchetypeId = ArchetypeId(6);

pub const MEADOW: GeometryId = GeometryId(0);
pub const RUINS: GeometryId = GeometryId(1);
pub const LAKE: GeometryId = GeometryId(2);

pub fn player() -> ArchetypeTemplate {
    ArchetypeTemplate {
        id: PLAYER,
        name: "player".into(),
        kind: ArchetypeKind::Player,
        defaults: ComponentSnapshot {
            transform: Some(Transform::default()),
            velocity: Some(Velocity::default()),
            health: Some(Health {
                current: 100.0,
                max: 100.0,
                regen_per_tick: 0.05,
                last_hit: None,
            }),
            intent: Some(Intent::idle()),
            network_id: Some(NetworkId::default()),
            visual: Some(Visual::default()),
            body: Some(Body {
                radius: 0.35,
                speed: 5.0,
                solid: true,
            }),
            combat: Some(Combat {
                damage: 12.0,
                reach: 1.3,
                cooldown_ticks: 15,
                ..Combat::default()
            }),
            ..Default::default()
        },
    }
}

fn npc(id: ArchetypeId, name: &str, behavior: u16, health: f32, body: Body, combat: Option<Combat>) -> ArchetypeTemplate {
    ArchetypeTemplate {
        id,
        name: name.into(),
        kind: ArchetypeKind::Npc,
        defaults: ComponentSnapshot {
            transform: Some(Transform::default()),
            velocity: Some(Velocity::default()),
            health: Some(Health {
                current: health,
                max: health,
                regen_per_tick: 0.02,
                last_hit: None,
            }),
            brain: Some(Brain {
                behavior: BehaviorId(behavior),
                ..Brain::default()
            }),
            intent: Some(Intent::idle()),
            visual: Some(Visual::default()),
            body: Some(body),
            combat,
            ..Default::default()
        },
    }
}

pub fn archetypes() -> Vec<ArchetypeTemplate> {
    vec![
        player(),
        npc(
            SKELETON,
            "skeleton",
            1,
            60.0,
            Body { radius: 0.35, speed: 3.2, solid: true },
            Some(Combat {
                damage: 8.0,
                reach: 1.2,
                cooldown_ticks: 25,
                ..Combat::default()
            }),
        ),
        npc(
            VILLAGER,
            "villager",
            2,
            40.0,
            Body { radius: 0.3, speed: 2.0, solid: true },
            None,
        ),
        npc(
            GUARD,
            "guard",
            3,
            120.0,
            Body { radius: 0.4, speed: 3.6, solid: true },
            Some(Combat {
                damage: 15.0,
                reach: 1.4,
                cooldown_ticks: 20,
                ..Combat::default()
            }),
        ),
        ArchetypeTemplate {
            id: ARROW,
            name: "arrow".into(),
            kind: ArchetypeKind::Projectile,
            defaults: ComponentSnapshot {
                transform: Some(Transform::default()),
                velocity: Some(Velocity::default()),
                visual: Some(Visual {
                    layer: RenderLayer::Projectiles,
                    ..Visual::default()
                }),
                body: Some(Body { radius: 0.1, speed: 12.0, solid: false }),
                projectile: Some(Projectile::default()),
                ..Default::default()
            },
        },
        ArchetypeTemplate {
            id: CRATE,
            name: "crate".into(),
            kind: ArchetypeKind::Prop,
            defaults: ComponentSnapshot {
                transform: Some(Transform::default()),
                visual: Some(Visual {
                    layer: RenderLayer::Ground,
                    ..Visual::default()
                }),
                body: Some(Body { radius: 0.45, speed: 0.0, solid: true }),
                ..Default::default()
            },
        },
        npc(
            SKELETON_ARCHER,
            "skeleton_archer",
            1,
            45.0,
            Body { radius: 0.35, speed: 2.8, solid: true },
            Some(Combat {
                damage: 6.0,
                reach: 6.0,
                cooldown_ticks: 40,
                ranged: true,
                projectile_speed: 10.0,
                ..Combat::default()
            }),
        ),
    ]
}

/// Open ground.
pub fn meadow(size: u32) -> ChunkGeometry {
    ChunkGeometry::filled(MEADOW, "meadow", size, TileKind::Floor)
}

/// Broken wall segments with gaps; everything stays reachable.
pub fn ruins(size: u32) -> ChunkGeometry {
    let mut g = ChunkGeometry::filled(RUINS, "ruins", size, TileKind::Floor);
    let mid = size / 2;
    for i in 2..size.saturating_sub(2) {
        if i != mid {
            g.set(mid, i, TileKind::Wall);
            g.set(i, mid, TileKind::Wall);
        }
    }
    g
}

/// A pond in the middle of the chunk.
pub fn lake(size: u32) -> ChunkGeometry {
    let mut g = ChunkGeometry::filled(LAKE, "lake", size, TileKind::Floor);
    let c = size as i64 / 2;
    let r = (size as i64 / 4).max(1);
    for row in 0..size {
        for col in 0..size {
            let (dx, dy) = (col as i64 - c, row as i64 - c);
            if dx * dx + dy * dy <= r * r {
                g.set(col, row, TileKind::Water);
            }
        }
    }
    g
}

pub fn catalog(scale: WorldScale) -> Result<AssetCatalog, AssetError> {
    let n = scale.chunk_tiles;
    let q = n / 4;
    let seeds = vec![ChunkSeed {
        coord: ChunkCoord::new(0, 0),
        geometry: MEADOW,
        spawns: vec![
            SeedSpawn {
                archetype: GUARD,
                tile: (q, q),
                patrol: vec![(q, q), (n - q, q), (n - q, n - q), (q, n - q)],
            },
            SeedSpawn {
                archetype: VILLAGER,
                tile: (n / 2, n / 2),
                patrol: Vec::new(),
            },
            SeedSpawn {
                archetype: CRATE,
                tile: (n / 2 + 2, n / 2 - 2),
                patrol: Vec::new(),
            },
        ],
    }];
    let population = vec![
        PopulationRule { archetype: SKELETON, per_mille: 600 },
        PopulationRule { archetype: VILLAGER, per_mille: 300 },
        PopulationRule { archetype: SKELETON_ARCHER, per_mille: 150 },
    ];
    AssetCatalog::new(
        scale,
        archetypes(),
        vec![meadow(n), ruins(n), lake(n)],
        vec![MEADOW, MEADOW, RUINS, LAKE],
        seeds,
        population,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_template_validates() {
        for t in archetypes() {
            t.validate().unwrap();
        }
    }

    #[test]
    fn ruins_keep_a_gap() {
        let g = ruins(16);
        assert!(!g.is_solid(8, 8));
        assert!(g.is_solid(8, 3));
        assert!(!g.is_solid(0, 0));
    }

    #[test]
    fn lake_has_water_in_center() {
        let g = lake(16);
        assert_eq!(g.tile(8, 8), TileKind::Water);
        assert_eq!(g.tile(0, 0), TileKind::Floor);
    }

    #[test]
    fn small_chunks_still_build() {
        let scale = WorldScale { tile_size: 1.0, chunk_tiles: 8 };
        assert!(catalog(scale).is_ok());
    }
}
