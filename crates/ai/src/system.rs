use crate::behavior::{Blackboard, BehaviorLibrary, PlayerView, SelfView, tick_node};
use crate::config::AiConfig;
use emberfall_ecs::*;
use emberfall_physics::TerrainView;

/// Runs one behavior-tree pass per active NPC, in ascending id order.
pub struct AiSystem {
    library: BehaviorLibrary,
    config: AiConfig,
}

impl AiSystem {
    pub fn new(library: BehaviorLibrary, config: AiConfig) -> Self {
        Self { library, config }
    }

    pub fn standard(config: AiConfig) -> Self {
        Self::new(BehaviorLibrary::standard(&config), config)
    }

    pub fn library(&self) -> &BehaviorLibrary {
        &self.library
    }
}

impl System for AiSystem {
    fn name(&self) -> &str {
        "ai"
    }

    fn access(&self) -> Access {
        Access::new()
            .read(ComponentKind::Transform)
            .read(ComponentKind::Health)
            .read(ComponentKind::Body)
            .read(ComponentKind::Combat)
            .read(ComponentKind::NetworkId)
            .write(ComponentKind::Brain)
            .write(ComponentKind::Intent)
    }

    fn run(&mut self, ctx: &SystemContext<'_>, _commands: &mut CommandBuffer) -> Result<(), SystemError> {
        let terrain = ctx
            .resource::<TerrainView>()
            .ok_or(SystemError::MissingResource("TerrainView"))?;
        let transforms = ctx.read::<Transform>()?;
        let healths = ctx.read::<Health>()?;
        let bodies = ctx.read::<Body>()?;
        let combats = ctx.read::<Combat>()?;
        let mut brains = ctx.write::<Brain>()?;
        let mut intents = ctx.write::<Intent>()?;

        let players: Vec<PlayerView> = ctx
            .query(ComponentMask::of(&[ComponentKind::NetworkId, ComponentKind::Transform]))?
            .filter(|id| !healths.get(*id).is_some_and(|h| h.is_dead()))
            .filter_map(|id| {
                let t = transforms.get(id)?;
                Some(PlayerView {
                    id,
                    position: t.position,
                    radius: bodies.get(id).map_or(0.0, |b| b.radius),
                })
            })
            .collect();

        let npcs: Vec<EntityId> = ctx
            .query(ComponentMask::of(&[
                ComponentKind::Brain,
                ComponentKind::Intent,
                ComponentKind::Transform,
            ]))?
            .collect();

        let mut budget = self.config.global_expansions_per_tick;
        let mut starved = 0usize;
        for id in npcs {
            let Some(position) = transforms.get(id).map(|t| t.position) else {
                continue;
            };
            let health = healths.get(id);
            if health.is_some_and(|h| h.is_dead()) {
                continue;
            }
            let me = SelfView {
                position,
                radius: bodies.get(id).map_or(0.0, |b| b.radius),
                health_fraction: health.map_or(1.0, |h| h.fraction()),
                reach: combats.get(id).map(|c| c.reach),
            };
            let Some(brain) = brains.get_mut(id) else {
                continue;
            };
            let Some(tree) = self.library.get(brain.behavior) else {
                tracing::warn!(entity = %id, behavior = brain.behavior.0, "unknown behavior, idling");
                brain.mode = AiMode::Idle;
                if let Some(intent) = intents.get_mut(id) {
                    *intent = Intent::idle();
                }
                continue;
            };
            if budget == 0 {
                starved += 1;
            }
            let mut bb = Blackboard {
                me,
                brain,
                intent: Intent::idle(),
                players: &players,
                terrain,
                config: &self.config,
                tick: ctx.tick,
                budget: &mut budget,
            };
            tick_node(tree, &mut bb);
            let decided = bb.intent;
            if let Some(intent) = intents.get_mut(id) {
                *intent = decided;
            }
        }
        if starved > 0 {
            tracing::debug!(starved, tick = ctx.tick, "path budget spent before every npc ran");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberfall_assets::{ChunkGeometry, TileKind};
    use emberfall_common::{ArchetypeId, ChunkCoord, GeometryId, WorldScale};
    use glam::Vec2;
    use std::sync::Arc;

    const HERO: ArchetypeId = ArchetypeId(0);
    const SKELETON: ArchetypeId = ArchetypeId(1);

    fn store() -> ComponentStore {
        let mut s = ComponentStore::new();
        s.register_archetype(ArchetypeTemplate {
            id: HERO,
            name: "hero".into(),
            kind: ArchetypeKind::Player,
            defaults: ComponentSnapshot {
                transform: Some(Transform::default()),
                health: Some(Health::default()),
                intent: Some(Intent::idle()),
                network_id: Some(NetworkId::default()),
                body: Some(Body::default()),
                ..Default::default()
            },
        })
        .unwrap();
        s.register_archetype(ArchetypeTemplate {
            id: SKELETON,
            name: "skeleton".into(),
            kind: ArchetypeKind::Npc,
            defaults: ComponentSnapshot {
                transform: Some(Transform::default()),
                health: Some(Health::default()),
                brain: Some(Brain {
                    behavior: BehaviorLibrary::MELEE,
                    ..Brain::default()
                }),
                intent: Some(Intent::idle()),
                body: Some(Body::default()),
                combat: Some(Combat::default()),
                ..Default::default()
            },
        })
        .unwrap();
        s
    }

    fn at(x: f32, y: f32) -> ComponentSnapshot {
        ComponentSnapshot {
            transform: Some(Transform {
                position: Vec2::new(x, y),
                facing: Vec2::Y,
            }),
            ..Default::default()
        }
    }

    /// One 16x16 chunk; the tiles around (12,8) are walled in.
    fn resources(sealed: bool) -> Resources {
        let mut g = ChunkGeometry::filled(GeometryId(0), "yard", 16, TileKind::Floor);
        if sealed {
            for i in 10..=14 {
                g.set(i, 6, TileKind::Wall);
                g.set(i, 10, TileKind::Wall);
                g.set(10, i - 4, TileKind::Wall);
                g.set(14, i - 4, TileKind::Wall);
            }
        }
        let mut t = TerrainView::new(WorldScale {
            tile_size: 1.0,
            chunk_tiles: 16,
        });
        t.insert(ChunkCoord::new(0, 0), Arc::new(g));
        let mut r = Resources::new();
        r.insert(t);
        r
    }

    fn step(sys: &mut AiSystem, s: &ComponentStore, r: &Resources, tick: u64) {
        let ctx = SystemContext::new(s, r, sys.access(), "ai", tick, 0.05);
        let mut cmds = CommandBuffer::new();
        sys.run(&ctx, &mut cmds).unwrap();
        assert!(cmds.is_empty());
    }

    #[test]
    fn npc_chases_nearby_player() {
        let mut s = store();
        let hero = s.spawn_with(HERO, at(8.5, 2.5)).unwrap();
        let npc = s.spawn_with(SKELETON, at(2.5, 2.5)).unwrap();
        let r = resources(false);
        let mut sys = AiSystem::standard(AiConfig::default());
        step(&mut sys, &s, &r, 1);
        let brain = s.get::<Brain>(npc).unwrap();
        assert_eq!(brain.mode, AiMode::Chase);
        assert_eq!(brain.target, Some(hero));
        assert!(s.get::<Intent>(npc).unwrap().movement.x > 0.9);
    }

    #[test]
    fn unreachable_player_sends_npc_idle() {
        let mut s = store();
        s.spawn_with(HERO, at(12.5, 8.5)).unwrap();
        let npc = s.spawn_with(SKELETON, at(4.5, 8.5)).unwrap();
        let r = resources(true);
        let cfg = AiConfig {
            expansions_per_tick: 32,
            ..AiConfig::default()
        };
        let mut sys = AiSystem::standard(cfg.clone());
        let mut failed_at = None;
        for tick in 1..40 {
            step(&mut sys, &s, &r, tick);
            if matches!(s.get::<Brain>(npc).unwrap().path, PathState::Failed { .. }) {
                failed_at = Some(tick);
                break;
            }
        }
        let failed_at = failed_at.expect("search should give up");
        step(&mut sys, &s, &r, failed_at + 1);
        let brain = s.get::<Brain>(npc).unwrap();
        assert_eq!(brain.mode, AiMode::Idle);
        assert_eq!(brain.fallback_until, failed_at + cfg.fallback_ticks);
        assert!(matches!(brain.path, PathState::Failed { .. }));
        assert_eq!(s.get::<Intent>(npc).unwrap().speed_scale, 0.0);
    }

    #[test]
    fn global_budget_is_shared() {
        let mut s = store();
        s.spawn_with(HERO, at(13.5, 10.5)).unwrap();
        let first = s.spawn_with(SKELETON, at(6.5, 6.5)).unwrap();
        let second = s.spawn_with(SKELETON, at(6.5, 7.5)).unwrap();
        let r = resources(false);
        let mut sys = AiSystem::standard(AiConfig {
            expansions_per_tick: 4,
            global_expansions_per_tick: 4,
            ..AiConfig::default()
        });
        step(&mut sys, &s, &r, 1);
        let a = s.get::<Brain>(first).unwrap();
        let b = s.get::<Brain>(second).unwrap();
        assert!(matches!(&a.path, PathState::Searching(st) if st.expanded == 4));
        assert!(matches!(&b.path, PathState::Searching(st) if st.expanded == 0));
    }

    #[test]
    fn missing_terrain_is_an_error() {
        let s = store();
        let r = Resources::new();
        let mut sys = AiSystem::standard(AiConfig::default());
        let ctx = SystemContext::new(&s, &r, sys.access(), "ai", 0, 0.05);
        let mut cmds = CommandBuffer::new();
        assert!(matches!(
            sys.run(&ctx, &mut cmds),
            Err(SystemError::MissingResource("TerrainView"))
        ));
    }
}
