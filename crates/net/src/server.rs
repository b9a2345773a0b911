use crate::config::{DisconnectPolicy, NetConfig};
use crate::error::NetError;
use crate::input::PlayerInputs;
use crate::snapshot::{NetSnapshot, SnapshotRing};
use crate::wire::{ClientMessage, InputFrame, ServerMessage, UpdateMessage};
use emberfall_common::{ConnectionId, DetRng, Tick, splitmix64};
use emberfall_ecs::{Body, ComponentSnapshot, ComponentStore, EntityId, Health, Transform};
use glam::Vec2;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Connection {
    entity: EntityId,
    ring: SnapshotRing,
    last_ack: Option<Tick>,
    /// Tick at which `last_ack` last moved forward, or the connect tick.
    acked_at: Tick,
    wants_full: bool,
    inputs: BTreeMap<u32, InputFrame>,
    last_input_seq: u32,
}

/// A connection that was closed, and what became of its entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnected {
    pub connection: ConnectionId,
    pub entity: EntityId,
    /// The NPC that took over, under [`DisconnectPolicy::HandToAi`].
    pub replacement: Option<EntityId>,
}

/// Server half of replication: interest sets, deltas, buffered input and
/// timeouts for every connection.
#[derive(Debug)]
pub struct ServerSync {
    config: NetConfig,
    connections: BTreeMap<ConnectionId, Connection>,
}

impl ServerSync {
    pub fn new(config: NetConfig) -> Self {
        Self {
            config,
            connections: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Registers `entity` as the avatar of `connection`. The reply is the
    /// welcome message for the client.
    pub fn connect(&mut self, connection: ConnectionId, entity: EntityId, tick: Tick, dt: f32, body: Body) -> ServerMessage {
        info!(?connection, %entity, tick, "client connected");
        self.connections.insert(
            connection,
            Connection {
                entity,
                ring: SnapshotRing::new(self.config.retention_ticks),
                last_ack: None,
                acked_at: tick,
                wants_full: true,
                inputs: BTreeMap::new(),
                last_input_seq: 0,
            },
        );
        ServerMessage::Welcome {
            connection,
            entity,
            tick,
            dt,
            body,
        }
    }

    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.connections.contains_key(&connection)
    }

    pub fn entity_of(&self, connection: ConnectionId) -> Option<EntityId> {
        self.connections.get(&connection).map(|c| c.entity)
    }

    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Records acks, resync requests and new input frames from a client.
    pub fn receive(&mut self, connection: ConnectionId, message: ClientMessage, tick: Tick) -> Result<(), NetError> {
        let capacity = self.config.input_buffer;
        let conn = self
            .connections
            .get_mut(&connection)
            .ok_or(NetError::UnknownConnection(connection))?;
        if let Some(ack) = message.ack_tick {
            if ack <= tick && conn.last_ack.is_none_or(|prev| ack > prev) {
                conn.last_ack = Some(ack);
                conn.acked_at = tick;
                // Acks only move forward, so nothing older can be a baseline.
                conn.ring.discard_before(ack);
            }
        }
        if message.request_full && !conn.wants_full {
            debug!(?connection, "client requested full state");
            conn.wants_full = true;
        }
        let mut dropped = 0usize;
        for frame in message.inputs {
            if frame.seq <= conn.last_input_seq || conn.inputs.contains_key(&frame.seq) {
                continue;
            }
            if conn.inputs.len() >= capacity {
                dropped += 1;
                continue;
            }
            conn.inputs.insert(frame.seq, frame);
        }
        if dropped > 0 {
            warn!(?connection, dropped, "input buffer full, frames dropped");
        }
        Ok(())
    }

    /// Pops the oldest buffered frame of every connection. Called once per
    /// tick, before systems run.
    pub fn take_inputs(&mut self) -> PlayerInputs {
        let mut inputs = PlayerInputs::default();
        for conn in self.connections.values_mut() {
            if let Some((seq, frame)) = conn.inputs.pop_first() {
                conn.last_input_seq = seq;
                inputs.insert(conn.entity, frame);
            }
        }
        inputs
    }

    /// Builds this tick's update for every connection, in ascending
    /// connection order. `interest` answers which entities lie within a
    /// radius of a point.
    pub fn outbound<F>(&mut self, store: &ComponentStore, tick: Tick, interest: F) -> Vec<(ConnectionId, ServerMessage)>
    where
        F: Fn(Vec2, f32) -> Vec<EntityId>,
    {
        let radius = self.config.view_radius;
        let mut out = Vec::with_capacity(self.connections.len());
        for (&connection, conn) in &mut self.connections {
            let Ok(center) = store.get::<Transform>(conn.entity).map(|t| t.position) else {
                debug!(?connection, entity = %conn.entity, "avatar missing, no update");
                continue;
            };
            let mut ids = interest(center, radius);
            if !ids.contains(&conn.entity) {
                ids.push(conn.entity);
            }
            let snapshot = NetSnapshot::capture(store, tick, ids);

            let baseline = if conn.wants_full {
                None
            } else {
                let found = conn.last_ack.and_then(|t| conn.ring.get(t));
                if found.is_none() && conn.last_ack.is_some() {
                    debug!(?connection, ack = ?conn.last_ack, "ack outside retention, sending full state");
                }
                found
            };
            let (entities, removed) = snapshot.diff(baseline);
            let update = UpdateMessage {
                server_tick: tick,
                baseline_tick: baseline.map(|b| b.tick),
                entities,
                removed,
                last_input_seq: conn.last_input_seq,
            };
            conn.wants_full = false;
            conn.ring.push(snapshot);
            out.push((connection, ServerMessage::Update(update)));
        }
        out
    }

    /// Closes every connection whose ack has not advanced for longer than
    /// `ack_timeout_ticks`. Messages that carry no new ack do not count.
    pub fn timeouts(&mut self, store: &mut ComponentStore, tick: Tick) -> Result<Vec<Disconnected>, NetError> {
        let limit = self.config.ack_timeout_ticks;
        let expired: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| tick.saturating_sub(c.acked_at) > limit)
            .map(|(id, _)| *id)
            .collect();
        let mut out = Vec::with_capacity(expired.len());
        for connection in expired {
            warn!(?connection, tick, "connection timed out");
            out.push(self.disconnect(store, connection)?);
        }
        Ok(out)
    }

    /// Removes the connection and applies the disconnect policy to its
    /// entity.
    pub fn disconnect(&mut self, store: &mut ComponentStore, connection: ConnectionId) -> Result<Disconnected, NetError> {
        let conn = self
            .connections
            .remove(&connection)
            .ok_or(NetError::UnknownConnection(connection))?;
        let entity = conn.entity;
        let mut replacement = None;
        if store.contains(entity) {
            let last = store.despawn(entity)?;
            if let DisconnectPolicy::HandToAi { archetype } = self.config.disconnect_policy {
                let overrides = takeover(store, archetype, entity, &last);
                let npc = store.spawn_with(archetype, overrides)?;
                info!(?connection, player = %entity, %npc, "player handed to ai");
                replacement = Some(npc);
            }
        }
        info!(?connection, %entity, "client disconnected");
        Ok(Disconnected {
            connection,
            entity,
            replacement,
        })
    }
}

/// Overrides for the NPC replacing a departed player: same position and
/// facing, remaining health carried over, home where the player stood.
fn takeover(
    store: &ComponentStore,
    archetype: emberfall_common::ArchetypeId,
    player: EntityId,
    last: &ComponentSnapshot,
) -> ComponentSnapshot {
    let mut overrides = ComponentSnapshot {
        transform: last.transform,
        ..Default::default()
    };
    let Some(template) = store.archetype(archetype) else {
        return overrides;
    };
    let position = last.transform.map_or(Vec2::ZERO, |t| t.position);
    if let Some(brain) = &template.defaults.brain {
        let mut brain = brain.clone();
        brain.home = position;
        brain.rng = DetRng::new(splitmix64(player.to_raw()));
        overrides.brain = Some(brain);
    }
    if let (Some(default), Some(old)) = (template.defaults.health, last.health) {
        overrides.health = Some(Health {
            current: old.current.min(default.max),
            ..default
        });
    }
    overrides
}
