use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::io::{IoPool, IoRequest, StreamEvent};
use crate::lod::{LodCache, LodSummary};
use crate::queue::LoadQueue;
use emberfall_assets::{AssetCatalog, BlueprintSpawn};
use emberfall_common::{ChunkCoord, DetRng, GeometryId, Tick};
use emberfall_ecs::*;
use emberfall_persist::{ChunkRecord, ChunkStore, EntityRecord};
use emberfall_physics::TerrainView;
use glam::Vec2;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkState {
    #[default]
    Unloaded,
    Loading,
    Active,
    Unloading,
    /// Failed to load `max_load_attempts` times; never requested again.
    Unavailable,
}

#[derive(Debug, Default)]
struct ChunkSlot {
    state: ChunkState,
    ticket: u64,
    cancel: Option<Arc<AtomicBool>>,
    last_wanted: Tick,
    attempts: u32,
    retry_at: Tick,
    geometry: Option<GeometryId>,
}

/// A record handed to storage and not yet confirmed.
#[derive(Debug)]
struct PendingSave {
    ticket: u64,
    record: ChunkRecord,
    /// Failed attempts so far.
    attempts: u32,
    /// Set after a failure: the tick from which the save is submitted again.
    retry_at: Option<Tick>,
}

/// Streaming statistics, refreshed by every `update`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub tracked_players: usize,
    pub active: usize,
    pub loading: usize,
    pub unloading: usize,
    pub unavailable: usize,
    pub queued: usize,
    pub requested_this_tick: usize,
    pub lod_chunks: usize,
    pub loads_requested: u64,
    pub loads_completed: u64,
    pub loads_cancelled: u64,
    pub load_failures: u64,
    pub unloads_started: u64,
    pub save_failures: u64,
}

/// Owns chunk residency, the entity-to-chunk membership index and the
/// terrain view of active chunks.
pub struct WorldStreamer {
    config: StreamConfig,
    catalog: Arc<AssetCatalog>,
    io: IoPool,
    chunks: BTreeMap<ChunkCoord, ChunkSlot>,
    queue: LoadQueue,
    players: Vec<(EntityId, Vec2)>,
    membership: HashMap<EntityId, ChunkCoord>,
    occupants: BTreeMap<ChunkCoord, BTreeSet<EntityId>>,
    pending_saves: BTreeMap<ChunkCoord, PendingSave>,
    save_backlog: VecDeque<IoRequest>,
    terrain: TerrainView,
    terrain_version: u64,
    lod: LodCache,
    next_ticket: u64,
    stats: StreamStats,
}

impl WorldStreamer {
    pub fn new(
        config: StreamConfig,
        catalog: Arc<AssetCatalog>,
        store: Arc<dyn ChunkStore>,
    ) -> Result<Self, StreamError> {
        let io = IoPool::new(store, config.io_workers, config.request_capacity, config.event_capacity)?;
        tracing::info!(workers = config.io_workers, view_radius = config.view_radius, "world streamer started");
        Ok(Self {
            terrain: TerrainView::new(catalog.scale()),
            config,
            catalog,
            io,
            chunks: BTreeMap::new(),
            queue: LoadQueue::new(),
            players: Vec::new(),
            membership: HashMap::new(),
            occupants: BTreeMap::new(),
            pending_saves: BTreeMap::new(),
            save_backlog: VecDeque::new(),
            terrain_version: 0,
            lod: LodCache::new(),
            next_ticket: 1,
            stats: StreamStats::default(),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self, coord: ChunkCoord) -> ChunkState {
        self.chunks.get(&coord).map_or(ChunkState::Unloaded, |s| s.state)
    }

    pub fn active_chunks(&self) -> Vec<ChunkCoord> {
        self.chunks_in(ChunkState::Active)
    }

    fn chunks_in(&self, state: ChunkState) -> Vec<ChunkCoord> {
        self.chunks
            .iter()
            .filter(|(_, s)| s.state == state)
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn terrain(&self) -> &TerrainView {
        &self.terrain
    }

    /// Bumped whenever a chunk enters or leaves the terrain view.
    pub fn terrain_version(&self) -> u64 {
        self.terrain_version
    }

    pub fn lod(&self) -> &LodCache {
        &self.lod
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn chunk_of(&self, id: EntityId) -> Option<ChunkCoord> {
        self.membership.get(&id).copied()
    }

    pub fn members(&self, coord: ChunkCoord) -> impl Iterator<Item = EntityId> + '_ {
        self.occupants.get(&coord).into_iter().flatten().copied()
    }

    fn ticket(&mut self) -> u64 {
        let t = self.next_ticket;
        self.next_ticket += 1;
        t
    }

    /// Drains streaming events. Returns chunks that just became unavailable.
    pub fn pump(&mut self, store: &mut ComponentStore, tick: Tick) -> Vec<StreamError> {
        let events = self.io.drain();
        let mut failures = Vec::new();
        for event in events {
            if let Some(err) = self.handle_event(event, store, tick) {
                failures.push(err);
            }
        }
        failures
    }

    fn handle_event(&mut self, event: StreamEvent, store: &mut ComponentStore, tick: Tick) -> Option<StreamError> {
        match event {
            StreamEvent::ChunkReady { coord, ticket, record } => {
                if !self.expects(coord, ticket, ChunkState::Loading) {
                    tracing::debug!(?coord, ticket, "discarding stale load result");
                    return None;
                }
                match self.activate(coord, record, store, tick) {
                    Ok(()) => None,
                    Err(e) => self.load_failed(coord, e.to_string(), tick),
                }
            }
            StreamEvent::ChunkLoadFailed { coord, ticket, reason } => {
                if !self.expects(coord, ticket, ChunkState::Loading) {
                    return None;
                }
                self.load_failed(coord, reason, tick)
            }
            StreamEvent::ChunkEvicted { coord, ticket } => {
                if self.pending_saves.get(&coord).is_some_and(|p| p.ticket == ticket) {
                    self.pending_saves.remove(&coord);
                }
                if self.expects(coord, ticket, ChunkState::Unloading) {
                    if let Some(slot) = self.chunks.get_mut(&coord) {
                        slot.state = ChunkState::Unloaded;
                        slot.cancel = None;
                    }
                    tracing::debug!(?coord, "chunk evicted");
                }
                None
            }
            StreamEvent::ChunkSaveFailed { coord, ticket, reason } => {
                // The record stays in memory: the chunk is restored from it
                // when wanted again, otherwise the save is retried.
                self.stats.save_failures += 1;
                let cap = self.config.max_load_attempts;
                match self.pending_saves.get_mut(&coord) {
                    Some(pending) if pending.ticket == ticket => {
                        pending.attempts += 1;
                        let delay = self.config.backoff(pending.attempts.min(cap));
                        pending.retry_at = Some(tick + delay);
                        tracing::warn!(
                            ?coord,
                            ticket,
                            attempt = pending.attempts,
                            retry_in = delay,
                            %reason,
                            "chunk save failed, keeping record in memory"
                        );
                    }
                    _ => tracing::debug!(?coord, ticket, %reason, "save of superseded record failed"),
                }
                if self.expects(coord, ticket, ChunkState::Unloading) {
                    if let Some(slot) = self.chunks.get_mut(&coord) {
                        slot.state = ChunkState::Unloaded;
                    }
                }
                None
            }
        }
    }

    fn expects(&self, coord: ChunkCoord, ticket: u64, state: ChunkState) -> bool {
        self.chunks
            .get(&coord)
            .is_some_and(|s| s.state == state && s.ticket == ticket)
    }

    fn load_failed(&mut self, coord: ChunkCoord, reason: String, tick: Tick) -> Option<StreamError> {
        self.stats.load_failures += 1;
        let max = self.config.max_load_attempts;
        let backoff = {
            let slot = self.chunks.entry(coord).or_default();
            slot.attempts += 1;
            slot.cancel = None;
            if slot.attempts >= max {
                slot.state = ChunkState::Unavailable;
                None
            } else {
                slot.state = ChunkState::Unloaded;
                let delay = self.config.backoff(slot.attempts);
                slot.retry_at = tick + delay;
                Some((slot.attempts, delay))
            }
        };
        match backoff {
            Some((attempt, delay)) => {
                tracing::warn!(?coord, attempt, retry_in = delay, %reason, "chunk load failed, retrying");
                None
            }
            None => {
                tracing::error!(?coord, attempts = max, %reason, "chunk unavailable");
                Some(StreamError::ChunkLoadFailure {
                    coord,
                    attempts: max,
                    reason,
                })
            }
        }
    }

    /// Spawns a chunk's entities and adds its geometry to the terrain view.
    fn activate(
        &mut self,
        coord: ChunkCoord,
        record: Option<ChunkRecord>,
        store: &mut ComponentStore,
        tick: Tick,
    ) -> Result<(), StreamError> {
        let blueprint = record
            .is_none()
            .then(|| self.catalog.blueprint(coord, self.config.world_seed));
        let geometry_id = match (&record, &blueprint) {
            (Some(r), _) => r.geometry,
            (None, Some(b)) => b.geometry,
            (None, None) => return Err(StreamError::UnknownGeometry(GeometryId(u32::MAX))),
        };
        let geometry = self
            .catalog
            .geometry(geometry_id)
            .ok_or(StreamError::UnknownGeometry(geometry_id))?;

        let mut spawned = Vec::new();
        if let Some(record) = record {
            for entity in record.entities {
                match store.spawn_with(entity.archetype, entity.components) {
                    Ok(id) => spawned.push(id),
                    Err(e) => tracing::warn!(?coord, archetype = entity.archetype.0, error = %e, "skipping persisted entity"),
                }
            }
        } else if let Some(blueprint) = blueprint {
            for spawn in &blueprint.spawns {
                let Some(template) = self.catalog.archetype(spawn.archetype) else {
                    continue;
                };
                match store.spawn_with(spawn.archetype, blueprint_overrides(template, spawn)) {
                    Ok(id) => spawned.push(id),
                    Err(e) => tracing::warn!(?coord, archetype = spawn.archetype.0, error = %e, "skipping seeded entity"),
                }
            }
        }

        self.terrain.insert(coord, geometry);
        self.terrain_version += 1;
        self.lod.remove(coord);
        if let Some(slot) = self.chunks.get_mut(&coord) {
            slot.state = ChunkState::Active;
            slot.attempts = 0;
            slot.cancel = None;
            slot.geometry = Some(geometry_id);
        }
        self.stats.loads_completed += 1;
        for id in &spawned {
            self.place(store, *id)?;
        }
        tracing::debug!(?coord, spawned = spawned.len(), tick, "chunk active");
        Ok(())
    }

    /// Puts one entity into the chunk containing its transform.
    fn place(&mut self, store: &mut ComponentStore, id: EntityId) -> Result<bool, EcsError> {
        let position = store.get::<Transform>(id)?.position;
        let chunk = self.catalog.scale().chunk_of(position);
        let mut moved = false;
        let previous = self.membership.insert(id, chunk);
        if previous != Some(chunk) {
            moved = previous.is_some();
            if let Some(old) = previous {
                if let Some(set) = self.occupants.get_mut(&old) {
                    set.remove(&id);
                }
            }
            self.occupants.entry(chunk).or_default().insert(id);
        }
        let suspend = self.state(chunk) != ChunkState::Active;
        if store.is_suspended(id)? != suspend {
            store.set_suspended(id, suspend)?;
        }
        Ok(moved)
    }

    /// Re-derives chunk membership from transforms. Entities in non-active
    /// chunks are suspended. Returns how many entities changed chunk.
    pub fn reassign(&mut self, store: &mut ComponentStore) -> Result<usize, StreamError> {
        let _span = tracing::debug_span!("stream_reassign").entered();
        let ids: Vec<EntityId> = store
            .query_including_suspended(ComponentMask::of(&[ComponentKind::Transform]))
            .collect();
        let mut moved = 0;
        for id in ids {
            if self.place(store, id)? {
                moved += 1;
            }
        }
        let gone: Vec<EntityId> = self
            .membership
            .keys()
            .filter(|id| !store.contains(**id))
            .copied()
            .collect();
        for id in gone {
            if let Some(chunk) = self.membership.remove(&id) {
                if let Some(set) = self.occupants.get_mut(&chunk) {
                    set.remove(&id);
                }
            }
        }
        self.occupants.retain(|_, set| !set.is_empty());
        Ok(moved)
    }

    /// Visible entities whose transform lies within `radius` of `center`,
    /// ascending by id.
    pub fn entities_in_radius(&self, store: &ComponentStore, center: Vec2, radius: f32) -> Vec<EntityId> {
        let mut out = Vec::new();
        for chunk in self.catalog.scale().chunks_in_circle(center, radius) {
            if self.state(chunk) != ChunkState::Active {
                continue;
            }
            for id in self.members(chunk) {
                let Ok(t) = store.get::<Transform>(id) else {
                    continue;
                };
                if t.position.distance_squared(center) <= radius * radius {
                    out.push(id);
                }
            }
        }
        out.sort_unstable_by_key(|id| id.index());
        out
    }

    /// One streaming decision pass: request wanted chunks nearest first,
    /// cancel loads nobody wants any more and unload chunks whose grace
    /// period ran out.
    pub fn update(&mut self, store: &mut ComponentStore, tick: Tick) -> Result<&StreamStats, StreamError> {
        let _span = tracing::info_span!("stream_update", tick).entered();
        let scale = self.catalog.scale();

        self.players = store
            .query_including_suspended(ComponentMask::of(&[ComponentKind::NetworkId, ComponentKind::Transform]))
            .filter_map(|id| store.get::<Transform>(id).ok().map(|t| (id, t.position)))
            .collect();

        let mut wanted: BTreeMap<ChunkCoord, u64> = BTreeMap::new();
        for (_, pos) in &self.players {
            let here = scale.chunk_of(*pos);
            for coord in scale.chunks_in_circle(*pos, self.config.view_radius) {
                let d = coord.distance_sq(here);
                wanted.entry(coord).and_modify(|old| *old = (*old).min(d)).or_insert(d);
            }
        }

        let mut restore = Vec::new();
        for (coord, dist) in &wanted {
            let slot = self.chunks.entry(*coord).or_default();
            slot.last_wanted = tick;
            match slot.state {
                ChunkState::Unloaded if tick >= slot.retry_at => {
                    if self.pending_saves.contains_key(coord) {
                        restore.push(*coord);
                    } else {
                        self.queue.enqueue(*coord, *dist);
                    }
                }
                ChunkState::Unloading => restore.push(*coord),
                _ => {}
            }
        }
        for coord in restore {
            self.restore_pending(coord, store, tick)?;
        }

        // Loads nobody wants any more.
        let mut cancelled = Vec::new();
        for (coord, slot) in self.chunks.iter_mut() {
            if wanted.contains_key(coord) {
                continue;
            }
            if slot.state == ChunkState::Loading {
                if let Some(flag) = slot.cancel.take() {
                    flag.store(true, Ordering::Release);
                }
                slot.state = ChunkState::Unloaded;
                cancelled.push(*coord);
            }
        }
        for coord in &cancelled {
            tracing::debug!(?coord, "pending load cancelled");
        }
        self.stats.loads_cancelled += cancelled.len() as u64;
        let unwanted_queued: Vec<ChunkCoord> = self
            .chunks
            .keys()
            .filter(|c| !wanted.contains_key(c) && self.queue.contains(**c))
            .copied()
            .collect();
        for coord in unwanted_queued {
            self.queue.remove(coord);
        }

        let requested = self.dispatch_loads();

        // Unloads: grace expiry first, then memory pressure, oldest first.
        let mut due = Vec::new();
        let mut early: Vec<(Tick, ChunkCoord)> = Vec::new();
        for (coord, slot) in &self.chunks {
            if slot.state != ChunkState::Active || wanted.contains_key(coord) {
                continue;
            }
            if tick.saturating_sub(slot.last_wanted) >= self.config.grace_ticks {
                due.push(*coord);
            } else {
                early.push((slot.last_wanted, *coord));
            }
        }
        let resident = self
            .chunks
            .values()
            .filter(|s| matches!(s.state, ChunkState::Active | ChunkState::Loading))
            .count()
            .saturating_sub(due.len());
        if resident > self.config.max_resident_chunks {
            early.sort_unstable();
            let excess = resident - self.config.max_resident_chunks;
            for (_, coord) in early.into_iter().take(excess) {
                tracing::debug!(?coord, "unloading early under memory pressure");
                due.push(coord);
            }
        }
        for coord in due {
            self.begin_unload(coord, store, tick)?;
        }

        self.retry_failed_saves(tick, false);
        self.retry_saves();

        let awareness = self.config.awareness_radius;
        let players = &self.players;
        let chunks = &self.chunks;
        self.lod.retain(|coord| {
            chunks.get(&coord).is_none_or(|s| s.state != ChunkState::Active)
                && players
                    .iter()
                    .any(|(_, p)| scale.circle_intersects_chunk(*p, awareness, coord))
        });

        // Forget idle bookkeeping for chunks that are fully unloaded.
        let pending = &self.pending_saves;
        let queue = &self.queue;
        self.chunks.retain(|coord, s| {
            !(s.state == ChunkState::Unloaded
                && s.attempts == 0
                && !wanted.contains_key(coord)
                && !pending.contains_key(coord)
                && !queue.contains(*coord))
        });

        self.refresh_stats(requested);
        Ok(&self.stats)
    }

    fn dispatch_loads(&mut self) -> usize {
        let mut requested = 0;
        while requested < self.config.load_budget {
            let Some((dist, coord)) = self.queue.dequeue() else {
                break;
            };
            if self.state(coord) != ChunkState::Unloaded {
                continue;
            }
            let ticket = self.ticket();
            let cancel = Arc::new(AtomicBool::new(false));
            let request = IoRequest::Load {
                coord,
                ticket,
                cancel: Arc::clone(&cancel),
            };
            if let Some(slot) = self.chunks.get_mut(&coord) {
                slot.state = ChunkState::Loading;
                slot.ticket = ticket;
                slot.cancel = Some(cancel);
            }
            if self.io.submit(request).is_err() {
                // Worker queue full: retry next tick.
                if let Some(slot) = self.chunks.get_mut(&coord) {
                    slot.state = ChunkState::Unloaded;
                    slot.cancel = None;
                }
                self.queue.enqueue(coord, dist);
                tracing::debug!(?coord, "io queue full, deferring load");
                break;
            }
            tracing::debug!(?coord, ticket, "chunk load requested");
            self.stats.loads_requested += 1;
            requested += 1;
        }
        requested
    }

    /// Captures every non-player entity of `coord` into a record, despawns
    /// them and hands the record to storage.
    fn begin_unload(&mut self, coord: ChunkCoord, store: &mut ComponentStore, tick: Tick) -> Result<(), StreamError> {
        let scale = self.catalog.scale();
        let awareness = self.config.awareness_radius;
        let keep_lod = self
            .players
            .iter()
            .any(|(_, p)| scale.circle_intersects_chunk(*p, awareness, coord));

        let members: Vec<EntityId> = self.members(coord).collect();
        let mut entities = Vec::new();
        let mut summaries = Vec::new();
        for id in members {
            if !store.contains(id) || store.has(id, ComponentKind::NetworkId) {
                continue;
            }
            let archetype = store.archetype_of(id)?;
            let components = store.despawn(id)?;
            if keep_lod {
                if let Some(t) = &components.transform {
                    summaries.push(LodSummary {
                        archetype,
                        position: t.position,
                    });
                }
            }
            entities.push(EntityRecord { archetype, components });
            self.membership.remove(&id);
            if let Some(set) = self.occupants.get_mut(&coord) {
                set.remove(&id);
            }
        }
        if keep_lod {
            self.lod.insert(coord, summaries);
        }

        self.terrain.remove(coord);
        self.terrain_version += 1;
        let ticket = self.ticket();
        let geometry = self
            .chunks
            .get(&coord)
            .and_then(|s| s.geometry)
            .unwrap_or(GeometryId(0));
        let record = ChunkRecord {
            coord,
            geometry,
            saved_tick: tick,
            entities,
        };
        tracing::debug!(?coord, entities = record.entities.len(), ticket, "chunk unloading");
        if let Some(slot) = self.chunks.get_mut(&coord) {
            slot.state = ChunkState::Unloading;
            slot.ticket = ticket;
        }
        self.pending_saves.insert(
            coord,
            PendingSave {
                ticket,
                record: record.clone(),
                attempts: 0,
                retry_at: None,
            },
        );
        if let Err(request) = self.io.submit(IoRequest::Save { record, ticket }) {
            self.save_backlog.push_back(request);
        }
        self.stats.unloads_started += 1;
        Ok(())
    }

    /// Brings back a chunk whose record has not reached storage yet.
    fn restore_pending(&mut self, coord: ChunkCoord, store: &mut ComponentStore, tick: Tick) -> Result<(), StreamError> {
        // Once live again the old record is obsolete; the next unload
        // captures a fresh one.
        let Some(PendingSave { record, .. }) = self.pending_saves.remove(&coord) else {
            return Ok(());
        };
        let ticket = self.ticket();
        if let Some(slot) = self.chunks.get_mut(&coord) {
            slot.state = ChunkState::Loading;
            slot.ticket = ticket;
        }
        tracing::debug!(?coord, "restoring chunk from unsaved record");
        self.activate(coord, Some(record), store, tick)
    }

    /// Hands failed saves back to storage once their backoff has passed,
    /// or all of them when `force` is set.
    fn retry_failed_saves(&mut self, tick: Tick, force: bool) {
        for (coord, pending) in self.pending_saves.iter_mut() {
            if !pending.retry_at.is_some_and(|at| force || tick >= at) {
                continue;
            }
            pending.retry_at = None;
            tracing::debug!(?coord, attempt = pending.attempts + 1, "retrying chunk save");
            let request = IoRequest::Save {
                record: pending.record.clone(),
                ticket: pending.ticket,
            };
            if let Err(request) = self.io.submit(request) {
                self.save_backlog.push_back(request);
            }
        }
    }

    fn retry_saves(&mut self) {
        let mut backlog = std::mem::take(&mut self.save_backlog);
        while let Some(request) = backlog.pop_front() {
            if let Err(request) = self.io.submit(request) {
                backlog.push_front(request);
                break;
            }
        }
        self.save_backlog = backlog;
    }

    fn refresh_stats(&mut self, requested: usize) {
        let mut s = StreamStats {
            tracked_players: self.players.len(),
            queued: self.queue.len(),
            requested_this_tick: requested,
            lod_chunks: self.lod.len(),
            ..self.stats.clone()
        };
        s.active = 0;
        s.loading = 0;
        s.unloading = 0;
        s.unavailable = 0;
        for slot in self.chunks.values() {
            match slot.state {
                ChunkState::Active => s.active += 1,
                ChunkState::Loading => s.loading += 1,
                ChunkState::Unloading => s.unloading += 1,
                ChunkState::Unavailable => s.unavailable += 1,
                ChunkState::Unloaded => {}
            }
        }
        self.stats = s;
    }

    /// Unloads every active chunk and resubmits every failed save, e.g. at
    /// shutdown. The saves still need `settle` to complete.
    pub fn unload_all(&mut self, store: &mut ComponentStore, tick: Tick) -> Result<usize, StreamError> {
        let active = self.active_chunks();
        for coord in &active {
            self.begin_unload(*coord, store, tick)?;
        }
        self.retry_failed_saves(tick, true);
        self.retry_saves();
        Ok(active.len())
    }

    /// Blocks until no load is in flight and every unloaded record has
    /// reached storage, or `timeout` passes. Returns whether the streamer
    /// settled; a save that keeps failing keeps it unsettled.
    pub fn settle(&mut self, store: &mut ComponentStore, tick: Tick, timeout: Duration) -> (bool, Vec<StreamError>) {
        let deadline = Instant::now() + timeout;
        let mut failures = self.pump(store, tick);
        loop {
            let busy = self
                .chunks
                .values()
                .any(|s| matches!(s.state, ChunkState::Loading | ChunkState::Unloading))
                || !self.pending_saves.is_empty()
                || !self.save_backlog.is_empty();
            if !busy {
                return (true, failures);
            }
            let now = Instant::now();
            if now >= deadline {
                return (false, failures);
            }
            self.retry_saves();
            let wait = (deadline - now).min(Duration::from_millis(10));
            match self.io.wait(wait) {
                Some(event) => {
                    if let Some(err) = self.handle_event(event, store, tick) {
                        failures.push(err);
                    }
                }
                // Inline storage has nothing further to deliver.
                None if self.io.is_inline() => return (false, failures),
                None => {}
            }
        }
    }
}

fn blueprint_overrides(template: &ArchetypeTemplate, spawn: &BlueprintSpawn) -> ComponentSnapshot {
    let facing = template.defaults.transform.as_ref().map_or(Vec2::Y, |t| t.facing);
    let mut overrides = ComponentSnapshot {
        transform: Some(Transform {
            position: spawn.position,
            facing,
        }),
        ..Default::default()
    };
    if let Some(brain) = &template.defaults.brain {
        overrides.brain = Some(Brain {
            home: spawn.position,
            patrol: spawn.patrol.clone(),
            rng: DetRng::new(spawn.rng_seed),
            ..brain.clone()
        });
    }
    overrides
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberfall_assets::builtin;
    use emberfall_common::{ConnectionId, WorldScale};
    use emberfall_persist::{FileChunkStore, MemoryChunkStore};

    const ORIGIN: ChunkCoord = ChunkCoord { x: 0, y: 0 };

    struct Fixture {
        streamer: WorldStreamer,
        store: ComponentStore,
        disk: Arc<MemoryChunkStore>,
        player: EntityId,
    }

    fn fixture(config: StreamConfig, player_at: Vec2) -> Fixture {
        let scale = WorldScale {
            tile_size: 1.0,
            chunk_tiles: 8,
        };
        let catalog = Arc::new(builtin::catalog(scale).unwrap());
        let mut store = ComponentStore::new();
        for t in catalog.archetypes() {
            store.register_archetype(t.clone()).unwrap();
        }
        let player = store
            .spawn_with(
                builtin::PLAYER,
                ComponentSnapshot {
                    transform: Some(Transform {
                        position: player_at,
                        facing: Vec2::Y,
                    }),
                    network_id: Some(NetworkId {
                        connection: ConnectionId(1),
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        let disk = Arc::new(MemoryChunkStore::new());
        let streamer = WorldStreamer::new(config, catalog, disk.clone()).unwrap();
        Fixture {
            streamer,
            store,
            disk,
            player,
        }
    }

    fn inline(view_radius: f32) -> StreamConfig {
        StreamConfig {
            view_radius,
            awareness_radius: view_radius.max(1.0) * 2.0,
            io_workers: 0,
            grace_ticks: 5,
            ..StreamConfig::default()
        }
    }

    impl Fixture {
        fn tick(&mut self, tick: Tick) -> Vec<StreamError> {
            let failures = self.streamer.pump(&mut self.store, tick);
            self.streamer.reassign(&mut self.store).unwrap();
            self.streamer.update(&mut self.store, tick).unwrap();
            failures
        }

        fn move_player(&mut self, to: Vec2) {
            self.store.get_mut::<Transform>(self.player).unwrap().position = to;
        }
    }

    #[test]
    fn nearest_chunk_requested_first_within_budget() {
        let mut f = fixture(
            StreamConfig {
                load_budget: 2,
                ..inline(6.0)
            },
            Vec2::new(4.0, 4.0),
        );
        let stats = f.streamer.update(&mut f.store, 1).unwrap().clone();
        assert_eq!(stats.requested_this_tick, 2);
        assert_eq!(stats.queued, 7);
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Loading);
    }

    #[test]
    fn loading_chunk_is_invisible_until_pumped() {
        let mut f = fixture(inline(3.0), Vec2::new(4.0, 4.0));
        f.streamer.update(&mut f.store, 1).unwrap();
        assert_eq!(f.store.len(), 1);
        f.streamer.pump(&mut f.store, 2);
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Active);
        // Seeded guard, villager and crate.
        assert_eq!(f.store.len(), 4);
        assert!(f.streamer.terrain().is_active(ORIGIN));
        let guard = f
            .store
            .query(ComponentMask::of(&[ComponentKind::Brain]))
            .find(|id| f.store.archetype_of(*id).ok() == Some(builtin::GUARD))
            .unwrap();
        let brain = f.store.get::<Brain>(guard).unwrap();
        assert_eq!(brain.patrol.len(), 4);
        assert_eq!(brain.home, Vec2::new(2.5, 2.5));
    }

    #[test]
    fn grace_period_then_unload_and_save() {
        let mut f = fixture(inline(3.0), Vec2::new(4.0, 4.0));
        f.tick(1);
        f.tick(2);
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Active);
        f.move_player(Vec2::new(28.0, 4.0));
        for t in 3..=6 {
            f.tick(t);
            assert_eq!(f.streamer.state(ORIGIN), ChunkState::Active, "tick {t}");
        }
        f.tick(7);
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Unloading);
        assert!(!f.streamer.terrain().is_active(ORIGIN));
        f.tick(8);
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Unloaded);
        assert!(f.disk.contains(ORIGIN));
        assert_eq!(f.store.len(), f.streamer.members(ChunkCoord::new(3, 0)).count());
    }

    #[test]
    fn oscillating_player_does_not_thrash() {
        let mut f = fixture(
            StreamConfig {
                grace_ticks: 20,
                ..inline(0.5)
            },
            Vec2::new(7.0, 4.0),
        );
        for t in 1..=12 {
            let x = if t % 2 == 0 { 9.0 } else { 7.0 };
            f.move_player(Vec2::new(x, 4.0));
            f.tick(t);
        }
        assert_eq!(f.streamer.stats().unloads_started, 0);
        assert_eq!(f.streamer.stats().loads_requested, 2);
        f.move_player(Vec2::new(9.0, 4.0));
        for t in 13..=40 {
            f.tick(t);
        }
        assert_eq!(f.streamer.stats().unloads_started, 1);
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Unloaded);
    }

    #[test]
    fn failed_loads_retry_with_backoff_then_give_up() {
        let mut f = fixture(
            StreamConfig {
                max_load_attempts: 3,
                retry_backoff_ticks: 2,
                ..inline(3.0)
            },
            Vec2::new(4.0, 4.0),
        );
        f.disk.fail_loads(ORIGIN, u32::MAX);
        let mut failures = Vec::new();
        let mut requested_at = Vec::new();
        for t in 1..=20 {
            failures.extend(f.tick(t));
            if f.streamer.state(ORIGIN) == ChunkState::Loading {
                requested_at.push(t);
            }
        }
        // Failures are seen at the next pump and back off by 2, then 4 ticks.
        assert_eq!(requested_at, vec![1, 4, 9]);
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Unavailable);
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], StreamError::ChunkLoadFailure { attempts: 3, .. }));
        assert_eq!(f.disk.load_count(), 3);
        assert!(f.streamer.terrain().is_solid(emberfall_common::TileCoord::new(4, 4)));
    }

    #[test]
    fn load_is_cancelled_when_player_leaves() {
        let mut f = fixture(
            StreamConfig {
                io_workers: 1,
                ..inline(3.0)
            },
            Vec2::new(4.0, 4.0),
        );
        f.disk.set_latency(Some(Duration::from_millis(100)));
        f.streamer.update(&mut f.store, 1).unwrap();
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Loading);
        f.move_player(Vec2::new(164.0, 4.0));
        f.streamer.update(&mut f.store, 2).unwrap();
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Unloaded);
        assert_eq!(f.streamer.stats().loads_cancelled, 1);
        let (settled, failures) = f.streamer.settle(&mut f.store, 3, Duration::from_secs(5));
        assert!(settled);
        assert!(failures.is_empty());
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Unloaded);
        assert_eq!(f.streamer.state(ChunkCoord::new(20, 0)), ChunkState::Active);
    }

    #[test]
    fn membership_follows_transform_and_suspends_outside_active() {
        let mut f = fixture(inline(3.0), Vec2::new(4.0, 4.0));
        f.tick(1);
        f.tick(2);
        let npc = f
            .store
            .query(ComponentMask::of(&[ComponentKind::Brain]))
            .next()
            .unwrap();
        assert_eq!(f.streamer.chunk_of(npc), Some(ORIGIN));
        f.store.get_mut::<Transform>(npc).unwrap().position = Vec2::new(20.0, 4.0);
        assert_eq!(f.streamer.reassign(&mut f.store).unwrap(), 1);
        assert_eq!(f.streamer.chunk_of(npc), Some(ChunkCoord::new(2, 0)));
        assert!(f.store.is_suspended(npc).unwrap());
        f.store.get_mut::<Transform>(npc).unwrap().position = Vec2::new(3.0, 3.0);
        f.streamer.reassign(&mut f.store).unwrap();
        assert!(!f.store.is_suspended(npc).unwrap());
        let near = f.streamer.entities_in_radius(&f.store, Vec2::new(4.0, 4.0), 2.0);
        assert!(near.contains(&npc));
        assert!(near.contains(&f.player));
    }

    #[test]
    fn unloaded_state_survives_reload() {
        let mut f = fixture(inline(3.0), Vec2::new(4.0, 4.0));
        f.tick(1);
        f.tick(2);
        let villager = f
            .store
            .query(ComponentMask::of(&[ComponentKind::Brain]))
            .find(|id| f.store.archetype_of(*id).ok() == Some(builtin::VILLAGER))
            .unwrap();
        f.store.get_mut::<Health>(villager).unwrap().current = 13.0;
        f.move_player(Vec2::new(164.0, 4.0));
        for t in 3..=12 {
            f.tick(t);
        }
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Unloaded);
        assert!(!f.store.contains(villager));
        f.move_player(Vec2::new(4.0, 4.0));
        f.tick(13);
        f.tick(14);
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Active);
        let restored = f
            .store
            .query(ComponentMask::of(&[ComponentKind::Brain]))
            .find(|id| f.store.archetype_of(*id).ok() == Some(builtin::VILLAGER))
            .unwrap();
        assert_ne!(restored, villager);
        assert_eq!(f.store.get::<Health>(restored).unwrap().current, 13.0);
    }

    #[test]
    fn memory_pressure_unloads_unwanted_early() {
        let mut f = fixture(
            StreamConfig {
                grace_ticks: 100,
                max_resident_chunks: 1,
                ..inline(0.5)
            },
            Vec2::new(4.0, 4.0),
        );
        f.tick(1);
        f.tick(2);
        f.move_player(Vec2::new(12.0, 4.0));
        f.tick(3);
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Unloading);
        assert_eq!(f.streamer.state(ChunkCoord::new(1, 0)), ChunkState::Loading);
    }

    #[test]
    fn lod_summaries_kept_within_awareness_only() {
        let mut f = fixture(
            StreamConfig {
                awareness_radius: 40.0,
                ..inline(3.0)
            },
            Vec2::new(4.0, 4.0),
        );
        f.tick(1);
        f.tick(2);
        f.move_player(Vec2::new(28.0, 4.0));
        for t in 3..=8 {
            f.tick(t);
        }
        assert_eq!(f.streamer.lod().get(ORIGIN).map(<[_]>::len), Some(3));
        f.move_player(Vec2::new(164.0, 4.0));
        f.tick(9);
        assert!(f.streamer.lod().get(ORIGIN).is_none());
    }

    #[test]
    fn failed_save_keeps_record_for_restore() {
        let mut f = fixture(inline(3.0), Vec2::new(4.0, 4.0));
        f.tick(1);
        f.tick(2);
        f.disk.fail_saves(true);
        f.move_player(Vec2::new(164.0, 4.0));
        for t in 3..=12 {
            f.tick(t);
        }
        assert_eq!(f.streamer.stats().save_failures, 1);
        assert!(!f.disk.contains(ORIGIN));
        f.move_player(Vec2::new(4.0, 4.0));
        f.tick(13);
        assert_eq!(f.streamer.state(ORIGIN), ChunkState::Active);
        assert_eq!(f.streamer.members(ORIGIN).count(), 4);
    }

    /// Saves fail while the player walks away, then storage recovers.
    fn abandoned_with_failing_saves() -> Fixture {
        let mut f = fixture(inline(3.0), Vec2::new(4.0, 4.0));
        f.tick(1);
        f.tick(2);
        f.disk.fail_saves(true);
        f.move_player(Vec2::new(164.0, 4.0));
        for t in 3..=12 {
            f.tick(t);
        }
        assert_eq!(f.streamer.stats().save_failures, 1);
        assert!(!f.disk.contains(ORIGIN));
        f
    }

    #[test]
    fn failed_save_is_retried_after_backoff() {
        let mut f = abandoned_with_failing_saves();
        f.disk.fail_saves(false);
        for t in 13..=40 {
            f.tick(t);
        }
        assert!(f.disk.contains(ORIGIN));
        assert_eq!(f.streamer.stats().save_failures, 1);
        let (settled, _) = f.streamer.settle(&mut f.store, 40, Duration::from_millis(100));
        assert!(settled);
    }

    #[test]
    fn failed_save_keeps_backing_off_while_storage_is_down() {
        let mut f = abandoned_with_failing_saves();
        for t in 13..=60 {
            f.tick(t);
        }
        let failures = f.streamer.stats().save_failures;
        assert!(failures > 1 && failures < 10, "{failures} attempts");
        assert!(!f.disk.contains(ORIGIN));
    }

    #[test]
    fn unload_all_flushes_failed_saves() {
        let mut f = abandoned_with_failing_saves();
        f.streamer.unload_all(&mut f.store, 13).unwrap();
        let (settled, _) = f.streamer.settle(&mut f.store, 13, Duration::from_millis(100));
        assert!(!settled);
        assert!(!f.disk.contains(ORIGIN));

        f.disk.fail_saves(false);
        f.streamer.unload_all(&mut f.store, 14).unwrap();
        let (settled, failures) = f.streamer.settle(&mut f.store, 14, Duration::from_secs(2));
        assert!(settled && failures.is_empty());
        assert!(f.disk.contains(ORIGIN));
    }

    #[test]
    fn file_store_round_trip_on_worker_threads() {
        let dir = tempfile::tempdir().unwrap();
        let config = StreamConfig {
            io_workers: 2,
            ..inline(3.0)
        };
        let villager_of = |f: &Fixture| {
            f.store
                .query(ComponentMask::of(&[ComponentKind::Brain]))
                .find(|id| f.store.archetype_of(*id).ok() == Some(builtin::VILLAGER))
        };

        let mut f = fixture(config.clone(), Vec2::new(4.0, 4.0));
        let catalog = Arc::clone(&f.streamer.catalog);
        let disk = Arc::new(FileChunkStore::open(dir.path()).unwrap());
        f.streamer = WorldStreamer::new(config.clone(), Arc::clone(&catalog), disk).unwrap();
        f.streamer.update(&mut f.store, 1).unwrap();
        let (settled, failures) = f.streamer.settle(&mut f.store, 1, Duration::from_secs(5));
        assert!(settled && failures.is_empty());
        let villager = villager_of(&f).unwrap();
        f.store.get_mut::<Health>(villager).unwrap().current = 9.0;
        f.streamer.unload_all(&mut f.store, 2).unwrap();
        let (settled, _) = f.streamer.settle(&mut f.store, 2, Duration::from_secs(5));
        assert!(settled);
        assert!(!f.store.contains(villager));
        drop(f);

        let mut g = fixture(config.clone(), Vec2::new(4.0, 4.0));
        let disk = Arc::new(FileChunkStore::open(dir.path()).unwrap());
        g.streamer = WorldStreamer::new(config, catalog, disk).unwrap();
        g.streamer.update(&mut g.store, 1).unwrap();
        g.streamer.settle(&mut g.store, 1, Duration::from_secs(5));
        let restored = villager_of(&g).unwrap();
        assert_eq!(g.store.get::<Health>(restored).unwrap().current, 9.0);
    }
}
