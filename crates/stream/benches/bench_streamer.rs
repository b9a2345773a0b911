use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

use emberfall_assets::builtin;
use emberfall_common::{ConnectionId, WorldScale};
use emberfall_ecs::{ComponentSnapshot, ComponentStore, EntityId, NetworkId, Transform};
use emberfall_persist::MemoryChunkStore;
use emberfall_stream::{StreamConfig, WorldStreamer};
use glam::Vec2;

const CENTER: Vec2 = Vec2::new(64.0, 64.0);

struct Bench {
    streamer: WorldStreamer,
    store: ComponentStore,
    player: EntityId,
}

fn at(position: Vec2) -> ComponentSnapshot {
    ComponentSnapshot {
        transform: Some(Transform {
            position,
            facing: Vec2::Y,
        }),
        ..Default::default()
    }
}

fn make_world(entity_count: usize, spacing: f32) -> Bench {
    let scale = WorldScale {
        tile_size: 1.0,
        chunk_tiles: 16,
    };
    let catalog = Arc::new(builtin::catalog(scale).unwrap());
    let mut store = ComponentStore::new();
    for t in catalog.archetypes() {
        store.register_archetype(t.clone()).unwrap();
    }
    let mut player_at = at(CENTER);
    player_at.network_id = Some(NetworkId {
        connection: ConnectionId(1),
    });
    let player = store.spawn_with(builtin::PLAYER, player_at).unwrap();

    let config = StreamConfig {
        view_radius: 48.0,
        awareness_radius: 96.0,
        io_workers: 0,
        load_budget: 64,
        ..StreamConfig::default()
    };
    let mut streamer = WorldStreamer::new(config, catalog, Arc::new(MemoryChunkStore::new())).unwrap();
    streamer.update(&mut store, 0).unwrap();
    streamer.settle(&mut store, 0, Duration::from_secs(5));

    let side = (entity_count as f32).sqrt().ceil() as usize;
    let origin = CENTER - Vec2::splat(side as f32 * spacing * 0.5);
    for i in 0..entity_count {
        let offset = Vec2::new((i % side) as f32, (i / side) as f32) * spacing;
        store.spawn_with(builtin::VILLAGER, at(origin + offset)).unwrap();
    }
    streamer.reassign(&mut store).unwrap();
    Bench {
        streamer,
        store,
        player,
    }
}

fn bench_reassign(entity_count: usize, iterations: usize) {
    let mut b = make_world(entity_count, 1.5);

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(b.streamer.reassign(black_box(&mut b.store)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  reassign ({entity_count} entities, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn bench_entities_in_radius(entity_count: usize, radius: f32, iterations: usize) {
    let b = make_world(entity_count, 1.5);

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(b.streamer.entities_in_radius(&b.store, black_box(CENTER), black_box(radius)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  radius query ({entity_count} entities, r={radius}, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_stream_update(entity_count: usize, iterations: usize) {
    let mut b = make_world(entity_count, 1.5);

    let start = Instant::now();
    for i in 0..iterations {
        // Walk the player back and forth across a few chunks.
        let x = CENTER.x + (i % 40) as f32;
        if let Ok(t) = b.store.get_mut::<Transform>(b.player) {
            t.position.x = x;
        }
        let tick = i as u64 + 1;
        let _ = black_box(b.streamer.pump(&mut b.store, tick));
        let _ = black_box(b.streamer.update(&mut b.store, tick).map(|s| s.active));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  stream update ({entity_count} entities, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn main() {
    println!("=== World Streamer Benchmarks ===\n");

    println!("Membership reassign:");
    bench_reassign(100, 1000);
    bench_reassign(1000, 100);
    bench_reassign(5000, 20);

    println!("\nRadius query:");
    bench_entities_in_radius(1000, 8.0, 10000);
    bench_entities_in_radius(1000, 24.0, 1000);
    bench_entities_in_radius(5000, 24.0, 1000);

    println!("\nStream update (inline I/O):");
    bench_stream_update(100, 1000);
    bench_stream_update(1000, 500);

    println!("\n=== Done ===");
}
