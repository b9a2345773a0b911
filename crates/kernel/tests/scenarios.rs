//! End-to-end scenarios driving a whole simulation through its public API.

use emberfall_assets::{AssetCatalog, ChunkGeometry, ChunkSeed, SeedSpawn, TileKind, builtin};
use emberfall_common::{ChunkCoord, GeometryId, WorldScale};
use emberfall_ecs::{AiMode, Brain, ComponentKind, ComponentMask, Intent, PathState, Transform};
use emberfall_kernel::{SimConfig, Simulation};
use emberfall_net::{ClientLink, ClientSync, DisconnectPolicy, NetError, Reconciled, ServerMessage};
use emberfall_persist::MemoryChunkStore;
use emberfall_stream::ChunkState;
use glam::Vec2;
use std::sync::Arc;
use std::time::Duration;

const TILES: u32 = 16;
const WARM_UP: Duration = Duration::from_secs(5);

fn scale() -> WorldScale {
    WorldScale {
        tile_size: 1.0,
        chunk_tiles: TILES,
    }
}

fn flat() -> ChunkGeometry {
    ChunkGeometry::filled(GeometryId(0), "flat", TILES, TileKind::Floor)
}

/// Every chunk uses `geometry`; nothing spawns except the seeds.
fn arena(geometry: ChunkGeometry, seeds: Vec<ChunkSeed>) -> AssetCatalog {
    let id = geometry.id;
    AssetCatalog::new(scale(), builtin::archetypes(), vec![geometry], vec![id], seeds, Vec::new()).unwrap()
}

fn arena_config(view_radius: f32) -> SimConfig {
    let mut config = SimConfig::deterministic();
    config.world = scale();
    config.stream.view_radius = view_radius;
    config.stream.awareness_radius = view_radius * 2.0;
    config
}

fn arena_sim(config: SimConfig, catalog: AssetCatalog) -> (Simulation, Arc<MemoryChunkStore>) {
    let disk = Arc::new(MemoryChunkStore::new());
    let sim = Simulation::new(config, catalog, disk.clone()).unwrap();
    (sim, disk)
}

fn pump(client: &mut ClientSync, link: &mut ClientLink) -> Vec<Result<Reconciled, NetError>> {
    link.poll().into_iter().map(|m| client.handle(m)).collect()
}

fn position(sim: &Simulation, id: emberfall_ecs::EntityId) -> Vec2 {
    sim.store().get::<Transform>(id).unwrap().position
}

/// Builtin world, one scripted player; returns the state hash after every
/// tick.
fn scripted_run(parallel: bool, ticks: u32) -> Vec<u64> {
    let mut config = SimConfig::deterministic();
    config.scheduler.parallel = parallel;
    let mut sim = Simulation::from_config(config).unwrap();
    let (_, mut link) = sim.connect(Vec2::new(16.5, 16.5)).unwrap();
    assert!(sim.warm_up(WARM_UP).unwrap());
    let mut client = ClientSync::new(sim.config().net.clone());
    pump(&mut client, &mut link);

    let dirs = [Vec2::X, Vec2::Y, Vec2::NEG_X, Vec2::NEG_Y];
    let mut hashes = Vec::new();
    for i in 0..ticks {
        client.predict(dirs[(i as usize / 15) % 4], i % 10 == 0);
        link.send(&client.outgoing()).unwrap();
        let report = sim.tick().unwrap();
        assert!(report.faults.is_empty(), "faults: {:?}", report.faults);
        pump(&mut client, &mut link);
        hashes.push(sim.state_hash());
    }
    hashes
}

#[test]
fn same_inputs_give_identical_states() {
    let a = scripted_run(false, 150);
    let b = scripted_run(false, 150);
    assert_eq!(a, b);
}

#[test]
fn parallel_stages_match_serial_execution() {
    assert_eq!(scripted_run(false, 120), scripted_run(true, 120));
}

#[test]
fn membership_follows_transforms() {
    let mut sim = Simulation::from_config(SimConfig::deterministic()).unwrap();
    let (_, mut link) = sim.connect(Vec2::new(16.5, 16.5)).unwrap();
    sim.warm_up(WARM_UP).unwrap();
    let mut client = ClientSync::new(sim.config().net.clone());
    for i in 0..100 {
        client.predict(if i < 50 { Vec2::X } else { Vec2::new(0.0, -1.0) }, false);
        link.send(&client.outgoing()).unwrap();
        sim.tick().unwrap();
        pump(&mut client, &mut link);

        let scale = sim.catalog().scale();
        let ids: Vec<_> = sim
            .store()
            .query_including_suspended(ComponentMask::of(&[ComponentKind::Transform]))
            .collect();
        for id in ids {
            let expected = scale.chunk_of(position(&sim, id));
            assert_eq!(sim.streamer().chunk_of(id), Some(expected), "entity {id} at tick {}", i + 1);
        }
    }
}

#[test]
fn prediction_agrees_with_server_on_open_ground() {
    let (mut sim, _) = arena_sim(arena_config(10.0), arena(flat(), Vec::new()));
    let (connection, mut link) = sim.connect(Vec2::new(8.5, 8.5)).unwrap();
    assert!(sim.warm_up(WARM_UP).unwrap());
    let player = sim.player_of(connection).unwrap();
    let mut client = ClientSync::new(sim.config().net.clone());
    assert_eq!(pump(&mut client, &mut link).len(), 1);
    assert_eq!(client.local_entity(), Some(player));

    for _ in 0..20 {
        client.predict(Vec2::X, false);
        link.send(&client.outgoing()).unwrap();
        sim.tick().unwrap();
        for result in pump(&mut client, &mut link) {
            assert!(matches!(result, Ok(Reconciled::Accepted)), "{result:?}");
        }
    }
    let server_pos = position(&sim, player);
    assert!((server_pos.x - 13.5).abs() < 1e-3);
    assert_eq!(client.predicted_position(), Some(server_pos));
    assert_eq!(client.corrections(), 0);
    assert_eq!(client.pending_inputs(), 0);
    let seen = client.entity(player).unwrap();
    assert_eq!(seen.state.transform.map(|t| t.position), Some(server_pos));
}

#[test]
fn teleport_desyncs_client_and_triggers_full_resync() {
    let (mut sim, _) = arena_sim(arena_config(10.0), arena(flat(), Vec::new()));
    let (connection, mut link) = sim.connect(Vec2::new(8.5, 8.5)).unwrap();
    sim.warm_up(WARM_UP).unwrap();
    let player = sim.player_of(connection).unwrap();
    let mut client = ClientSync::new(sim.config().net.clone());
    pump(&mut client, &mut link);
    for _ in 0..3 {
        link.send(&client.outgoing()).unwrap();
        sim.tick().unwrap();
        pump(&mut client, &mut link);
    }

    sim.store_mut().get_mut::<Transform>(player).unwrap().position.x += 10.0;
    link.send(&client.outgoing()).unwrap();
    sim.tick().unwrap();
    let results = pump(&mut client, &mut link);
    assert!(matches!(results.as_slice(), [Err(NetError::NetworkDesync { .. })]));
    assert!(client.wants_full_state());

    link.send(&client.outgoing()).unwrap();
    sim.tick().unwrap();
    let messages = link.poll();
    assert!(matches!(messages.as_slice(), [ServerMessage::Update(u)] if u.is_full()));
    for m in messages {
        client.handle(m).unwrap();
    }
    assert!(!client.wants_full_state());
    assert_eq!(client.predicted_position(), Some(position(&sim, player)));
}

#[test]
fn oscillating_player_loads_once_per_grace_window() {
    let mut config = arena_config(8.0);
    config.stream.grace_ticks = 60;
    let (mut sim, _) = arena_sim(config, arena(flat(), Vec::new()));
    let (connection, _link) = sim.connect(Vec2::new(23.5, 8.5)).unwrap();
    sim.warm_up(WARM_UP).unwrap();
    let player = sim.player_of(connection).unwrap();
    let edge = ChunkCoord::new(2, 0);
    assert_eq!(sim.streamer().state(edge), ChunkState::Unloaded);
    let loads_before = sim.streamer().stats().loads_requested;

    for i in 0..120 {
        let x = if (i / 10) % 2 == 0 { 24.5 } else { 23.5 };
        sim.store_mut().get_mut::<Transform>(player).unwrap().position.x = x;
        let report = sim.tick().unwrap();
        assert_eq!(report.stream.unloads_started, 0, "tick {}", report.tick);
    }
    assert_eq!(sim.streamer().stats().loads_requested - loads_before, 1);
    assert_eq!(sim.streamer().state(edge), ChunkState::Active);

    sim.store_mut().get_mut::<Transform>(player).unwrap().position.x = 23.5;
    sim.run_ticks(70).unwrap();
    assert_eq!(sim.streamer().stats().unloads_started, 1);
    assert_eq!(sim.streamer().state(edge), ChunkState::Unloaded);
}

#[test]
fn walled_in_player_makes_npc_give_up_and_idle() {
    let mut sealed = flat();
    for i in 10..=14 {
        sealed.set(i, 6, TileKind::Wall);
        sealed.set(i, 10, TileKind::Wall);
        sealed.set(10, i - 4, TileKind::Wall);
        sealed.set(14, i - 4, TileKind::Wall);
    }
    let seeds = vec![ChunkSeed {
        coord: ChunkCoord::new(0, 0),
        geometry: GeometryId(0),
        spawns: vec![SeedSpawn {
            archetype: builtin::SKELETON,
            tile: (3, 8),
            patrol: Vec::new(),
        }],
    }];
    let (mut sim, _) = arena_sim(arena_config(10.0), arena(sealed, seeds));
    let (_, mut link) = sim.connect(Vec2::new(12.5, 8.5)).unwrap();
    sim.warm_up(WARM_UP).unwrap();
    let npcs: Vec<_> = sim.store().query(ComponentMask::of(&[ComponentKind::Brain])).collect();
    assert_eq!(npcs.len(), 1);
    let npc = npcs[0];

    let mut gave_up = false;
    for _ in 0..300 {
        sim.tick().unwrap();
        link.poll();
        if matches!(sim.store().get::<Brain>(npc).unwrap().path, PathState::Failed { .. }) {
            gave_up = true;
            break;
        }
    }
    assert!(gave_up, "search never failed");
    sim.tick().unwrap();
    let brain = sim.store().get::<Brain>(npc).unwrap();
    assert_eq!(brain.mode, AiMode::Idle);
    assert!(brain.is_recovering(sim.current_tick()));
    drop(brain);
    assert_eq!(sim.store().get::<Intent>(npc).unwrap().speed_scale, 0.0);
}

#[test]
fn silent_client_is_handed_to_ai() {
    let mut config = arena_config(10.0);
    config.net.ack_timeout_ticks = 20;
    config.net.disconnect_policy = DisconnectPolicy::HandToAi {
        archetype: builtin::GUARD,
    };
    let (mut sim, _) = arena_sim(config, arena(flat(), Vec::new()));
    let (connection, mut link) = sim.connect(Vec2::new(8.5, 8.5)).unwrap();
    sim.warm_up(WARM_UP).unwrap();
    let player = sim.player_of(connection).unwrap();

    let mut gone = Vec::new();
    for _ in 0..25 {
        let report = sim.tick().unwrap();
        link.poll();
        gone.extend(report.disconnected);
    }
    assert_eq!(gone.len(), 1);
    assert_eq!(gone[0].connection, connection);
    assert_eq!(gone[0].entity, player);
    let npc = gone[0].replacement.expect("replacement npc");
    assert!(!sim.store().contains(player));
    assert_eq!(sim.store().archetype_of(npc).unwrap(), builtin::GUARD);
    assert_eq!(position(&sim, npc), Vec2::new(8.5, 8.5));
    assert!(sim.server().is_empty());
}

#[test]
fn dropped_link_despawns_player() {
    let (mut sim, _) = arena_sim(arena_config(10.0), arena(flat(), Vec::new()));
    let (connection, link) = sim.connect(Vec2::new(8.5, 8.5)).unwrap();
    sim.warm_up(WARM_UP).unwrap();
    let player = sim.player_of(connection).unwrap();
    drop(link);
    let report = sim.tick().unwrap();
    assert_eq!(report.disconnected.len(), 1);
    assert_eq!(report.disconnected[0].replacement, None);
    assert!(!sim.store().contains(player));
}

#[test]
fn failing_chunk_retries_then_becomes_unavailable() {
    let (mut sim, disk) = arena_sim(arena_config(8.0), arena(flat(), Vec::new()));
    let broken = ChunkCoord::new(2, 0);
    disk.fail_loads(broken, 100);
    let (_, _link) = sim.connect(Vec2::new(24.5, 8.5)).unwrap();
    sim.warm_up(WARM_UP).unwrap();

    let mut unavailable_at = None;
    for _ in 0..150 {
        let report = sim.tick().unwrap();
        if sim.streamer().state(broken) == ChunkState::Unavailable {
            unavailable_at = Some(report.tick);
            break;
        }
    }
    let tick = unavailable_at.expect("chunk never marked unavailable");
    // Backoff of 10 then 20 ticks between the three attempts.
    assert!(tick >= 30, "gave up too early at {tick}");
    assert_eq!(sim.streamer().stats().load_failures, 3);
    sim.run_ticks(50).unwrap();
    assert_eq!(sim.streamer().state(broken), ChunkState::Unavailable);
    assert_eq!(sim.streamer().stats().load_failures, 3);
    assert_eq!(sim.streamer().state(ChunkCoord::new(1, 0)), ChunkState::Active);
}

#[test]
fn frames_are_published_to_bounded_subscribers() {
    let (mut sim, _) = arena_sim(arena_config(10.0), arena(flat(), Vec::new()));
    let (connection, _link) = sim.connect(Vec2::new(8.5, 8.5)).unwrap();
    sim.warm_up(WARM_UP).unwrap();
    let player = sim.player_of(connection).unwrap();
    let frames = sim.subscribe(2);
    sim.run_ticks(5).unwrap();
    let ticks: Vec<u64> = frames.try_iter().map(|f| f.tick).collect();
    assert_eq!(ticks, vec![1, 2]);
    let latest = sim.latest_frame();
    assert_eq!(latest.tick, 5);
    assert!(latest.get(player).is_some());
}

#[test]
fn shutdown_persists_chunks() {
    let (mut sim, disk) = arena_sim(arena_config(10.0), arena(flat(), Vec::new()));
    let (_, _link) = sim.connect(Vec2::new(8.5, 8.5)).unwrap();
    sim.warm_up(WARM_UP).unwrap();
    sim.run_ticks(3).unwrap();
    assert!(sim.shutdown(WARM_UP).unwrap());
    assert!(disk.contains(ChunkCoord::new(0, 0)));
}
