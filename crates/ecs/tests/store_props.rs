//! Property tests for the component store.
//!
//! Random spawn/despawn/mutate/suspend sequences must keep the store's
//! invariants: dead ids stay dead, ids are never reissued, queries are
//! ordered and integrity checks pass.

use emberfall_common::ArchetypeId;
use emberfall_ecs::*;
use glam::Vec2;
use proptest::prelude::*;
use std::collections::HashSet;

const NPC: ArchetypeId = ArchetypeId(1);
const PROP: ArchetypeId = ArchetypeId(2);

#[derive(Debug, Clone)]
enum Op {
    SpawnNpc(f32, f32),
    SpawnProp,
    Despawn(usize),
    Hurt(usize, f32),
    Suspend(usize, bool),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let coord = (-10_000i32..10_000).prop_map(|v| v as f32 * 0.01);
    prop_oneof![
        (coord.clone(), coord).prop_map(|(x, y)| Op::SpawnNpc(x, y)),
        Just(Op::SpawnProp),
        (0..64usize).prop_map(Op::Despawn),
        (0..64usize, 0..50i32).prop_map(|(i, d)| Op::Hurt(i, d as f32)),
        (0..64usize, any::<bool>()).prop_map(|(i, s)| Op::Suspend(i, s)),
    ]
}

fn store() -> ComponentStore {
    let mut s = ComponentStore::new();
    s.register_archetype(ArchetypeTemplate {
        id: NPC,
        name: "npc".into(),
        kind: ArchetypeKind::Npc,
        defaults: ComponentSnapshot {
            transform: Some(Transform::default()),
            health: Some(Health::default()),
            brain: Some(Brain::default()),
            intent: Some(Intent::default()),
            body: Some(Body::default()),
            ..Default::default()
        },
    })
    .unwrap();
    s.register_archetype(ArchetypeTemplate {
        id: PROP,
        name: "rock".into(),
        kind: ArchetypeKind::Prop,
        defaults: ComponentSnapshot {
            transform: Some(Transform::default()),
            ..Default::default()
        },
    })
    .unwrap();
    s
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn random_ops_preserve_invariants(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut s = store();
        let mut alive: Vec<EntityId> = Vec::new();
        let mut dead: Vec<EntityId> = Vec::new();
        let mut issued: HashSet<EntityId> = HashSet::new();

        for op in ops {
            match op {
                Op::SpawnNpc(x, y) => {
                    let e = s.spawn_with(NPC, ComponentSnapshot {
                        transform: Some(Transform { position: Vec2::new(x, y), ..Transform::default() }),
                        ..Default::default()
                    }).unwrap();
                    prop_assert!(issued.insert(e), "id {} reissued", e);
                    alive.push(e);
                }
                Op::SpawnProp => {
                    let e = s.spawn(PROP).unwrap();
                    prop_assert!(issued.insert(e), "id {} reissued", e);
                    alive.push(e);
                }
                Op::Despawn(i) if !alive.is_empty() => {
                    let e = alive.remove(i % alive.len());
                    s.despawn(e).unwrap();
                    dead.push(e);
                }
                Op::Hurt(i, d) if !alive.is_empty() => {
                    let e = alive[i % alive.len()];
                    if let Ok(h) = s.get_mut::<Health>(e) {
                        h.current -= d;
                    }
                }
                Op::Suspend(i, flag) if !alive.is_empty() => {
                    let e = alive[i % alive.len()];
                    s.set_suspended(e, flag).unwrap();
                }
                _ => {}
            }
        }

        s.verify_integrity().unwrap();
        prop_assert_eq!(s.len(), alive.len());
        for e in &dead {
            prop_assert!(matches!(s.get::<Transform>(*e), Err(EcsError::UnknownEntity(_))));
        }

        let all: Vec<EntityId> = s.query_including_suspended(ComponentMask::EMPTY).collect();
        prop_assert_eq!(all.len(), alive.len());
        prop_assert!(all.windows(2).all(|w| w[0].index() < w[1].index()));

        let visible = s.query(ComponentMask::EMPTY).count();
        let suspended = alive.iter().filter(|e| s.is_suspended(**e).unwrap()).count();
        prop_assert_eq!(visible + suspended, alive.len());
    }

    #[test]
    fn state_hash_is_reproducible(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let run = |ops: &[Op]| {
            let mut s = store();
            let mut alive = Vec::new();
            for op in ops {
                match op {
                    Op::SpawnNpc(..) => alive.push(s.spawn(NPC).unwrap()),
                    Op::SpawnProp => alive.push(s.spawn(PROP).unwrap()),
                    Op::Despawn(i) if !alive.is_empty() => {
                        let e = alive.remove(i % alive.len());
                        s.despawn(e).unwrap();
                    }
                    _ => {}
                }
            }
            s.state_hash()
        };
        prop_assert_eq!(run(&ops), run(&ops));
    }
}
