use crate::config::AiConfig;
use crate::pathfinding::{NavOutcome, navigate};
use emberfall_common::{BehaviorId, Tick};
use emberfall_ecs::{AiMode, Brain, EntityId, Intent, PathState};
use emberfall_physics::TerrainView;
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Some living player is within this radius; it becomes the target.
    PlayerWithin { radius: f32 },
    TargetInReach,
    HealthBelow { fraction: f32 },
    HasPatrolRoute,
    /// Rolls the brain's own generator.
    Chance { per_mille: u32 },
    /// Inside the fallback window after a failed path search.
    Recovering,
    AwayFromHome { distance: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionLeaf {
    Idle,
    Wander,
    Patrol,
    Chase,
    Attack,
    Flee,
    ReturnHome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorNode {
    /// First child that does not fail.
    Selector(Vec<BehaviorNode>),
    /// Every child in order until one does not succeed.
    Sequence(Vec<BehaviorNode>),
    Condition(Condition),
    Action(ActionLeaf),
}

/// Per-archetype behavior trees, keyed by `Brain::behavior`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorLibrary {
    trees: BTreeMap<BehaviorId, BehaviorNode>,
}

impl BehaviorLibrary {
    pub const IDLE: BehaviorId = BehaviorId(0);
    pub const MELEE: BehaviorId = BehaviorId(1);
    pub const VILLAGER: BehaviorId = BehaviorId(2);
    pub const GUARD: BehaviorId = BehaviorId(3);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: BehaviorId, tree: BehaviorNode) {
        self.trees.insert(id, tree);
    }

    pub fn get(&self, id: BehaviorId) -> Option<&BehaviorNode> {
        self.trees.get(&id)
    }

    pub fn standard(config: &AiConfig) -> Self {
        use ActionLeaf as A;
        use BehaviorNode::{Action, Selector, Sequence};
        use Condition as C;
        let cond = BehaviorNode::Condition;
        let sees = cond(C::PlayerWithin {
            radius: config.detection_radius,
        });

        let mut lib = Self::new();
        lib.insert(Self::IDLE, Action(A::Idle));
        lib.insert(
            Self::MELEE,
            Selector(vec![
                Sequence(vec![
                    cond(C::HealthBelow {
                        fraction: config.flee_health,
                    }),
                    sees.clone(),
                    Action(A::Flee),
                ]),
                Sequence(vec![sees.clone(), cond(C::TargetInReach), Action(A::Attack)]),
                Sequence(vec![cond(C::Recovering), Action(A::Idle)]),
                Sequence(vec![sees.clone(), Action(A::Chase)]),
                Sequence(vec![
                    cond(C::AwayFromHome {
                        distance: config.leash_radius,
                    }),
                    Action(A::ReturnHome),
                ]),
                Action(A::Idle),
            ]),
        );
        lib.insert(
            Self::VILLAGER,
            Selector(vec![
                Sequence(vec![
                    cond(C::PlayerWithin {
                        radius: config.detection_radius * 0.5,
                    }),
                    cond(C::HealthBelow { fraction: 0.99 }),
                    Action(A::Flee),
                ]),
                Action(A::Wander),
            ]),
        );
        lib.insert(
            Self::GUARD,
            Selector(vec![
                Sequence(vec![sees.clone(), cond(C::TargetInReach), Action(A::Attack)]),
                Sequence(vec![cond(C::Recovering), cond(C::HasPatrolRoute), Action(A::Patrol)]),
                Sequence(vec![cond(C::Recovering), Action(A::Idle)]),
                Sequence(vec![sees, Action(A::Chase)]),
                Sequence(vec![cond(C::HasPatrolRoute), Action(A::Patrol)]),
                Sequence(vec![cond(C::AwayFromHome { distance: 1.0 }), Action(A::ReturnHome)]),
                Action(A::Idle),
            ]),
        );
        lib
    }
}

/// What an NPC can observe about itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SelfView {
    pub position: Vec2,
    pub radius: f32,
    pub health_fraction: f32,
    pub reach: Option<f32>,
}

/// A living player as seen by the AI pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlayerView {
    pub id: EntityId,
    pub position: Vec2,
    pub radius: f32,
}

pub(crate) struct Blackboard<'a> {
    pub me: SelfView,
    pub brain: &'a mut Brain,
    pub intent: Intent,
    pub players: &'a [PlayerView],
    pub terrain: &'a TerrainView,
    pub config: &'a AiConfig,
    pub tick: Tick,
    pub budget: &'a mut u32,
}

impl Blackboard<'_> {
    fn target(&self) -> Option<&PlayerView> {
        let id = self.brain.target?;
        self.players.iter().find(|p| p.id == id)
    }

    fn walk_to(&mut self, goal: Vec2, speed: f32) -> NavOutcome {
        let out = navigate(
            self.brain,
            self.me.position,
            goal,
            self.terrain,
            self.tick,
            self.config,
            self.budget,
        );
        self.intent = match out {
            NavOutcome::Moving(dir) => Intent::walk(dir, speed),
            _ => Intent::idle(),
        };
        out
    }
}

pub(crate) fn tick_node(node: &BehaviorNode, bb: &mut Blackboard<'_>) -> Status {
    match node {
        BehaviorNode::Selector(children) => {
            for child in children {
                let s = tick_node(child, bb);
                if s != Status::Failure {
                    return s;
                }
            }
            Status::Failure
        }
        BehaviorNode::Sequence(children) => {
            for child in children {
                let s = tick_node(child, bb);
                if s != Status::Success {
                    return s;
                }
            }
            Status::Success
        }
        BehaviorNode::Condition(c) => {
            if check(*c, bb) {
                Status::Success
            } else {
                Status::Failure
            }
        }
        BehaviorNode::Action(a) => act(*a, bb),
    }
}

fn check(condition: Condition, bb: &mut Blackboard<'_>) -> bool {
    match condition {
        Condition::PlayerWithin { radius } => {
            let mut best: Option<(f32, EntityId)> = None;
            for p in bb.players {
                let d = p.position.distance(bb.me.position);
                if d > radius {
                    continue;
                }
                // Players arrive sorted by id, so strict `<` keeps the lower id on ties.
                if best.is_none_or(|(bd, _)| d < bd) {
                    best = Some((d, p.id));
                }
            }
            bb.brain.target = best.map(|(_, id)| id);
            best.is_some()
        }
        Condition::TargetInReach => {
            let (Some(reach), Some(t)) = (bb.me.reach, bb.target()) else {
                return false;
            };
            t.position.distance(bb.me.position) - t.radius - bb.me.radius <= reach
        }
        Condition::HealthBelow { fraction } => bb.me.health_fraction < fraction,
        Condition::HasPatrolRoute => !bb.brain.patrol.is_empty(),
        Condition::Chance { per_mille } => bb.brain.rng.below(1000) < per_mille,
        Condition::Recovering => bb.brain.is_recovering(bb.tick),
        Condition::AwayFromHome { distance } => bb.me.position.distance(bb.brain.home) > distance,
    }
}

const WAYPOINT_RADIUS: f32 = 0.5;

fn act(action: ActionLeaf, bb: &mut Blackboard<'_>) -> Status {
    match action {
        ActionLeaf::Idle => {
            bb.brain.mode = AiMode::Idle;
            // A failed search is remembered until its fallback window ends so
            // the same goal is not searched again meanwhile.
            let remember = matches!(bb.brain.path, PathState::Failed { .. }) && bb.brain.is_recovering(bb.tick);
            if !remember {
                bb.brain.path = PathState::None;
            }
            bb.intent = Intent::idle();
            Status::Success
        }
        ActionLeaf::Wander => {
            if bb.tick >= bb.brain.wander_until {
                let walk = bb.brain.rng.below(1000) < 400;
                let dir = if bb.me.position.distance(bb.brain.home) > bb.config.wander_radius {
                    (bb.brain.home - bb.me.position).normalize_or_zero()
                } else if walk {
                    let angle = bb.brain.rng.unit_f32() * std::f32::consts::TAU;
                    Vec2::from_angle(angle)
                } else {
                    Vec2::ZERO
                };
                bb.brain.wander_dir = dir;
                bb.brain.wander_until = bb.tick + 20 + bb.brain.rng.below(40) as u64;
            }
            bb.brain.mode = if bb.brain.wander_dir == Vec2::ZERO {
                AiMode::Idle
            } else {
                AiMode::Wander
            };
            bb.intent = Intent::walk(bb.brain.wander_dir, 0.5);
            Status::Running
        }
        ActionLeaf::Patrol => {
            let len = bb.brain.patrol.len();
            if len == 0 {
                return Status::Failure;
            }
            let mut index = bb.brain.patrol_index as usize % len;
            if bb.brain.patrol[index].distance(bb.me.position) <= WAYPOINT_RADIUS {
                index = (index + 1) % len;
            }
            bb.brain.patrol_index = index as u32;
            let waypoint = bb.brain.patrol[index];
            bb.brain.mode = AiMode::Patrol;
            match bb.walk_to(waypoint, 0.6) {
                NavOutcome::Failed | NavOutcome::Abandoned => {
                    // Skip an unreachable waypoint next time round.
                    bb.brain.patrol_index = ((index + 1) % len) as u32;
                    Status::Failure
                }
                _ => Status::Running,
            }
        }
        ActionLeaf::Chase => {
            let Some(goal) = bb.target().map(|t| t.position) else {
                return Status::Failure;
            };
            bb.brain.mode = AiMode::Chase;
            match bb.walk_to(goal, 1.0) {
                NavOutcome::Failed | NavOutcome::Abandoned => Status::Failure,
                _ => Status::Running,
            }
        }
        ActionLeaf::Attack => {
            let Some(target) = bb.target().copied() else {
                return Status::Failure;
            };
            bb.brain.mode = AiMode::Attack;
            bb.intent = Intent {
                movement: Vec2::ZERO,
                speed_scale: 0.0,
                attack: true,
                target: Some(target.id),
            };
            Status::Success
        }
        ActionLeaf::Flee => {
            let Some(threat) = bb.target().map(|t| t.position) else {
                return Status::Failure;
            };
            let away = (bb.me.position - threat).normalize_or_zero();
            let away = if away == Vec2::ZERO { Vec2::X } else { away };
            bb.brain.mode = AiMode::Flee;
            bb.brain.path = PathState::None;
            bb.intent = Intent::walk(away, 1.0);
            Status::Running
        }
        ActionLeaf::ReturnHome => {
            bb.brain.mode = AiMode::ReturnHome;
            let home = bb.brain.home;
            match bb.walk_to(home, 0.8) {
                NavOutcome::Arrived => Status::Success,
                NavOutcome::Failed | NavOutcome::Abandoned => Status::Failure,
                NavOutcome::Moving(_) => Status::Running,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberfall_assets::{ChunkGeometry, TileKind};
    use emberfall_common::{ChunkCoord, GeometryId, WorldScale};
    use std::sync::Arc;

    fn terrain() -> TerrainView {
        let mut t = TerrainView::new(WorldScale {
            tile_size: 1.0,
            chunk_tiles: 32,
        });
        t.insert(
            ChunkCoord::new(0, 0),
            Arc::new(ChunkGeometry::filled(GeometryId(0), "open", 32, TileKind::Floor)),
        );
        t
    }

    fn me(x: f32, y: f32) -> SelfView {
        SelfView {
            position: Vec2::new(x, y),
            radius: 0.4,
            health_fraction: 1.0,
            reach: Some(1.2),
        }
    }

    fn player(index: u32, x: f32, y: f32) -> PlayerView {
        PlayerView {
            id: EntityId::new(index, 0),
            position: Vec2::new(x, y),
            radius: 0.35,
        }
    }

    fn run(tree: BehaviorId, me: SelfView, brain: &mut Brain, players: &[PlayerView], tick: Tick) -> (Status, Intent) {
        let cfg = AiConfig::default();
        let lib = BehaviorLibrary::standard(&cfg);
        let t = terrain();
        let mut budget = 10_000;
        let mut bb = Blackboard {
            me,
            brain,
            intent: Intent::idle(),
            players,
            terrain: &t,
            config: &cfg,
            tick,
            budget: &mut budget,
        };
        let status = tick_node(lib.get(tree).unwrap(), &mut bb);
        (status, bb.intent)
    }

    #[test]
    fn melee_attacks_player_in_reach() {
        let mut brain = Brain::default();
        let players = [player(3, 11.0, 10.0)];
        let (status, intent) = run(BehaviorLibrary::MELEE, me(10.0, 10.0), &mut brain, &players, 1);
        assert_eq!(status, Status::Success);
        assert!(intent.attack);
        assert_eq!(intent.target, Some(players[0].id));
        assert_eq!(brain.mode, AiMode::Attack);
    }

    #[test]
    fn melee_chases_visible_player() {
        let mut brain = Brain::default();
        let players = [player(3, 16.5, 10.5)];
        let (status, intent) = run(BehaviorLibrary::MELEE, me(10.5, 10.5), &mut brain, &players, 1);
        assert_eq!(status, Status::Running);
        assert_eq!(brain.mode, AiMode::Chase);
        assert!(intent.movement.x > 0.9);
    }

    #[test]
    fn nearest_player_wins_and_ties_go_to_lower_id() {
        let mut brain = Brain::default();
        let players = [player(1, 14.0, 10.0), player(2, 6.0, 10.0), player(5, 12.0, 10.0)];
        run(BehaviorLibrary::MELEE, me(10.0, 10.0), &mut brain, &players, 1);
        assert_eq!(brain.target, Some(players[2].id));

        let tied = [player(1, 14.0, 10.0), player(2, 6.0, 10.0)];
        run(BehaviorLibrary::MELEE, me(10.0, 10.0), &mut brain, &tied, 1);
        assert_eq!(brain.target, Some(tied[0].id));
    }

    #[test]
    fn wounded_melee_flees() {
        let mut brain = Brain::default();
        let players = [player(3, 12.0, 10.0)];
        let mut view = me(10.0, 10.0);
        view.health_fraction = 0.1;
        let (_, intent) = run(BehaviorLibrary::MELEE, view, &mut brain, &players, 1);
        assert_eq!(brain.mode, AiMode::Flee);
        assert!(intent.movement.x < -0.9);
    }

    #[test]
    fn recovering_melee_idles_instead_of_chasing() {
        let mut brain = Brain {
            fallback_until: 50,
            ..Brain::default()
        };
        let players = [player(3, 16.0, 10.0)];
        let (_, intent) = run(BehaviorLibrary::MELEE, me(10.0, 10.0), &mut brain, &players, 10);
        assert_eq!(brain.mode, AiMode::Idle);
        assert_eq!(intent.speed_scale, 0.0);
    }

    #[test]
    fn idling_remembers_failed_path_only_while_recovering() {
        let mut brain = Brain {
            fallback_until: 50,
            home: Vec2::new(10.0, 10.0),
            path: PathState::Failed {
                goal: emberfall_common::TileCoord::new(16, 10),
                at: 5,
            },
            ..Brain::default()
        };
        run(BehaviorLibrary::MELEE, me(10.0, 10.0), &mut brain, &[], 10);
        assert_eq!(brain.mode, AiMode::Idle);
        assert!(matches!(brain.path, PathState::Failed { at: 5, .. }));

        run(BehaviorLibrary::MELEE, me(10.0, 10.0), &mut brain, &[], 50);
        assert!(matches!(brain.path, PathState::None));
    }

    #[test]
    fn guard_patrols_without_players() {
        let mut brain = Brain {
            behavior: BehaviorLibrary::GUARD,
            patrol: vec![Vec2::new(10.5, 10.5), Vec2::new(20.5, 10.5)],
            ..Brain::default()
        };
        let (status, intent) = run(BehaviorLibrary::GUARD, me(10.5, 10.5), &mut brain, &[], 1);
        assert_eq!(status, Status::Running);
        assert_eq!(brain.mode, AiMode::Patrol);
        assert_eq!(brain.patrol_index, 1);
        assert!(intent.movement.x > 0.9);
    }

    #[test]
    fn villager_wander_is_reproducible() {
        let mut a = Brain {
            rng: emberfall_common::DetRng::new(42),
            ..Brain::default()
        };
        let mut b = a.clone();
        for tick in 0..200 {
            let (_, ia) = run(BehaviorLibrary::VILLAGER, me(5.0, 5.0), &mut a, &[], tick);
            let (_, ib) = run(BehaviorLibrary::VILLAGER, me(5.0, 5.0), &mut b, &[], tick);
            assert_eq!(ia, ib);
        }
        assert_eq!(a.wander_until, b.wander_until);
    }

    #[test]
    fn library_round_trips_through_json() {
        let lib = BehaviorLibrary::standard(&AiConfig::default());
        let text = serde_json::to_string(&lib).unwrap();
        let back: BehaviorLibrary = serde_json::from_str(&text).unwrap();
        assert_eq!(back.get(BehaviorLibrary::GUARD), lib.get(BehaviorLibrary::GUARD));
    }
}
