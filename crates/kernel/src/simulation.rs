use crate::clock::SimClock;
use crate::config::SimConfig;
use crate::error::SimError;
use crate::scheduler::{Scheduler, SystemFault};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use emberfall_ai::AiSystem;
use emberfall_assets::{AssetCatalog, builtin};
use emberfall_common::{ConnectionId, Tick};
use emberfall_ecs::{Body, ComponentSnapshot, ComponentStore, EntityId, NetworkId, Resources, System, Transform, VisualFrame};
use emberfall_net::{ClientLink, Disconnected, InputSystem, PlayerInputs, ServerLink, ServerSync, link_pair};
use emberfall_persist::{ChunkStore, FileChunkStore, MemoryChunkStore};
use emberfall_physics::{AnimationSystem, CombatSystem, MovementSystem, RegenSystem};
use emberfall_stream::{StreamError, StreamStats, WorldStreamer};
use glam::Vec2;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn};

/// What happened during one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: Tick,
    pub faults: Vec<SystemFault>,
    pub commands: usize,
    pub spawned: usize,
    pub despawned: usize,
    pub chunk_failures: usize,
    pub disconnected: Vec<Disconnected>,
    pub stream: StreamStats,
    pub elapsed: Duration,
}

/// The authoritative simulation: component store, systems, world streaming
/// and replication, advanced one fixed step at a time.
pub struct Simulation {
    config: SimConfig,
    catalog: Arc<AssetCatalog>,
    store: ComponentStore,
    resources: Resources,
    scheduler: Scheduler,
    streamer: WorldStreamer,
    server: ServerSync,
    links: BTreeMap<ConnectionId, ServerLink>,
    next_connection: u32,
    clock: SimClock,
    terrain_version: Option<u64>,
    latest_frame: Arc<VisualFrame>,
    subscribers: Vec<Sender<Arc<VisualFrame>>>,
}

impl Simulation {
    /// Builds the catalog and chunk store named by the config.
    pub fn from_config(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let catalog = match &config.catalog_path {
            Some(path) => AssetCatalog::load(path)?,
            None => builtin::catalog(config.world)?,
        };
        let chunks: Arc<dyn ChunkStore> = match &config.storage_path {
            Some(path) => {
                let mut store = FileChunkStore::open(path)?;
                store.bind_catalog(&catalog.fingerprint())?;
                Arc::new(store)
            }
            None => Arc::new(MemoryChunkStore::new()),
        };
        Self::new(config, catalog, chunks)
    }

    pub fn new(config: SimConfig, catalog: AssetCatalog, chunks: Arc<dyn ChunkStore>) -> Result<Self, SimError> {
        config.validate()?;
        if catalog.scale() != config.world {
            warn!(catalog = ?catalog.scale(), config = ?config.world, "catalog world scale overrides the configured one");
        }
        if catalog.archetype(config.player_archetype).is_none() {
            return Err(SimError::InvalidConfig(format!(
                "player archetype {:?} is not in the catalog",
                config.player_archetype
            )));
        }
        let catalog = Arc::new(catalog);
        let mut store = ComponentStore::new();
        for template in catalog.archetypes() {
            store.register_archetype(template.clone())?;
        }
        let streamer = WorldStreamer::new(config.stream.clone(), Arc::clone(&catalog), chunks)?;
        let scheduler = Scheduler::new(Self::standard_systems(&config), &config.scheduler);
        let mut resources = Resources::new();
        resources.insert(PlayerInputs::default());
        resources.insert(streamer.terrain().clone());
        info!(
            dt = config.dt,
            stages = scheduler.stage_count(),
            systems = scheduler.len(),
            "simulation ready"
        );
        Ok(Self {
            server: ServerSync::new(config.net.clone()),
            clock: SimClock::new(config.dt),
            catalog,
            store,
            resources,
            scheduler,
            streamer,
            links: BTreeMap::new(),
            next_connection: 1,
            terrain_version: None,
            latest_frame: Arc::new(VisualFrame::default()),
            subscribers: Vec::new(),
            config,
        })
    }

    /// Input, AI, combat, regeneration, movement and animation, in that
    /// declaration order.
    pub fn standard_systems(config: &SimConfig) -> Vec<Box<dyn System>> {
        vec![
            Box::new(InputSystem),
            Box::new(AiSystem::standard(config.ai.clone())),
            Box::new(CombatSystem::new(config.physics.clone())),
            Box::new(RegenSystem),
            Box::new(MovementSystem::new(config.physics.broadphase_cell)),
            Box::new(AnimationSystem::new(config.physics.clone())),
        ]
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn catalog(&self) -> &AssetCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &ComponentStore {
        &self.store
    }

    /// Direct store access between ticks, for tools and scripted tests.
    pub fn store_mut(&mut self) -> &mut ComponentStore {
        &mut self.store
    }

    pub fn streamer(&self) -> &WorldStreamer {
        &self.streamer
    }

    pub fn server(&self) -> &ServerSync {
        &self.server
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn current_tick(&self) -> Tick {
        self.clock.tick()
    }

    pub fn state_hash(&self) -> u64 {
        self.store.state_hash()
    }

    pub fn latest_frame(&self) -> Arc<VisualFrame> {
        Arc::clone(&self.latest_frame)
    }

    /// Frames published from now on. A subscriber that falls more than
    /// `capacity` frames behind misses frames rather than stalling the tick.
    pub fn subscribe(&mut self, capacity: usize) -> Receiver<Arc<VisualFrame>> {
        let (tx, rx) = bounded(capacity.max(1));
        self.subscribers.push(tx);
        rx
    }

    /// Spawns a player at `position` and opens a link for it. The welcome
    /// message is already queued on the returned client end.
    pub fn connect(&mut self, position: Vec2) -> Result<(ConnectionId, ClientLink), SimError> {
        let connection = ConnectionId(self.next_connection);
        self.next_connection += 1;
        let entity = self.store.spawn_with(
            self.config.player_archetype,
            ComponentSnapshot {
                transform: Some(Transform {
                    position,
                    facing: Vec2::Y,
                }),
                network_id: Some(NetworkId { connection }),
                ..Default::default()
            },
        )?;
        let body = self.store.get::<Body>(entity).map(|b| *b).unwrap_or_default();
        // Hidden until the chunk under it is active.
        self.streamer.reassign(&mut self.store)?;
        let welcome = self
            .server
            .connect(connection, entity, self.clock.tick(), self.config.dt, body);
        let (mut server_end, client_end) = link_pair(self.config.net.link_capacity);
        server_end.send(&welcome)?;
        self.links.insert(connection, server_end);
        Ok((connection, client_end))
    }

    pub fn player_of(&self, connection: ConnectionId) -> Option<EntityId> {
        self.server.entity_of(connection)
    }

    pub fn disconnect(&mut self, connection: ConnectionId) -> Result<Disconnected, SimError> {
        self.links.remove(&connection);
        Ok(self.server.disconnect(&mut self.store, connection)?)
    }

    /// Loads the chunks around every player before the first tick. Blocks
    /// for at most `timeout`; returns whether streaming settled.
    pub fn warm_up(&mut self, timeout: Duration) -> Result<bool, SimError> {
        let tick = self.clock.tick();
        let mut settled = false;
        // A few rounds, since each update is limited by the load budget.
        for _ in 0..64 {
            self.streamer.update(&mut self.store, tick)?;
            let (done, failures) = self.streamer.settle(&mut self.store, tick, timeout);
            Self::absorb(failures)?;
            self.streamer.reassign(&mut self.store)?;
            settled = done;
            if !done || self.streamer.stats().queued == 0 {
                break;
            }
        }
        self.sync_terrain();
        Ok(settled)
    }

    /// Advances the simulation by one fixed step.
    pub fn tick(&mut self) -> Result<TickReport, SimError> {
        let tick = self.clock.tick() + 1;
        let _span = info_span!("tick", tick).entered();
        let started = std::time::Instant::now();
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        let failures = self.streamer.pump(&mut self.store, tick);
        report.chunk_failures = failures.len();
        Self::absorb(failures)?;

        self.receive(tick, &mut report)?;
        self.sync_terrain();

        let (commands, systems) = self.scheduler.run(&self.store, &self.resources, tick, self.config.dt);
        report.faults = systems.faults;
        report.commands = commands.len();
        let applied = commands.apply(&mut self.store, tick);
        report.spawned = applied.spawned.len();
        report.despawned = applied.despawned.len();

        self.streamer.reassign(&mut self.store)?;
        report.stream = self.streamer.update(&mut self.store, tick)?.clone();
        self.store.verify_integrity().map_err(SimError::Corruption)?;

        self.publish(tick);
        self.send(tick, &mut report)?;

        self.clock.advance();
        report.elapsed = started.elapsed();
        let every = self.config.logging.summary_every;
        if every > 0 && tick % every == 0 {
            info!(
                tick,
                entities = self.store.len(),
                active_chunks = report.stream.active,
                connections = self.server.len(),
                ms = report.elapsed.as_secs_f32() * 1000.0,
                "tick summary"
            );
        }
        Ok(report)
    }

    /// Runs `n` ticks, stopping at the first fatal error.
    pub fn run_ticks(&mut self, n: u64) -> Result<Vec<TickReport>, SimError> {
        (0..n).map(|_| self.tick()).collect()
    }

    /// Unloads every chunk and waits for the saves to land.
    pub fn shutdown(&mut self, timeout: Duration) -> Result<bool, SimError> {
        let tick = self.clock.tick();
        let unloaded = self.streamer.unload_all(&mut self.store, tick)?;
        let (settled, failures) = self.streamer.settle(&mut self.store, tick, timeout);
        Self::absorb(failures)?;
        info!(unloaded, settled, "simulation shut down");
        Ok(settled)
    }

    fn absorb(failures: Vec<StreamError>) -> Result<(), SimError> {
        for failure in failures {
            match failure {
                StreamError::Ecs(e) if e.is_fatal() => return Err(SimError::Corruption(e)),
                other => warn!(error = %other, "streaming failure"),
            }
        }
        Ok(())
    }

    fn sync_terrain(&mut self) {
        let version = self.streamer.terrain_version();
        if self.terrain_version != Some(version) {
            self.resources.insert(self.streamer.terrain().clone());
            self.terrain_version = Some(version);
            debug!(version, chunks = self.streamer.terrain().len(), "terrain view refreshed");
        }
    }

    fn receive(&mut self, tick: Tick, report: &mut TickReport) -> Result<(), SimError> {
        let mut closed = Vec::new();
        for (&connection, link) in &mut self.links {
            for message in link.poll() {
                self.server.receive(connection, message, tick)?;
            }
            if !link.is_open() {
                closed.push(connection);
            }
        }
        for connection in closed {
            info!(?connection, "client link closed");
            report.disconnected.push(self.disconnect(connection)?);
        }
        self.resources.insert(self.server.take_inputs());
        Ok(())
    }

    fn publish(&mut self, tick: Tick) {
        let frame = Arc::new(VisualFrame::capture(&self.store, tick));
        self.subscribers.retain(|tx| match tx.try_send(Arc::clone(&frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(tick, "frame subscriber lagging, frame skipped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        self.latest_frame = frame;
    }

    fn send(&mut self, tick: Tick, report: &mut TickReport) -> Result<(), SimError> {
        let streamer = &self.streamer;
        let store = &self.store;
        let messages = self
            .server
            .outbound(store, tick, |center, radius| streamer.entities_in_radius(store, center, radius));
        for (connection, message) in messages {
            if let Some(link) = self.links.get_mut(&connection) {
                link.send(&message)?;
            }
        }
        for gone in self.server.timeouts(&mut self.store, tick)? {
            self.links.remove(&gone.connection);
            report.disconnected.push(gone);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("tick", &self.clock.tick())
            .field("entities", &self.store.len())
            .field("connections", &self.server.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
