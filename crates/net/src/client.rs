//! Client half of replication: applies server updates, predicts the local
//! player from its own input and reconciles when authority disagrees.

use crate::config::NetConfig;
use crate::error::NetError;
use crate::snapshot::EntityState;
use crate::wire::{ClientMessage, InputFrame, ServerMessage, UpdateMessage};
use emberfall_common::{ConnectionId, Tick};
use emberfall_ecs::{Body, EntityId};
use emberfall_physics::integrate_intent;
use glam::Vec2;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ClientEntity {
    pub state: EntityState,
    /// Server tick of the last update that touched this entity.
    pub updated: Tick,
}

type WorldView = BTreeMap<EntityId, ClientEntity>;

/// Result of handling one server message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciled {
    Welcomed,
    /// Older than or equal to an update already applied.
    Stale,
    /// The delta's baseline is no longer known; a full state was requested.
    MissingBaseline,
    /// Applied; the prediction was within tolerance.
    Accepted,
    /// Applied, and the prediction was snapped by `error` world units.
    Corrected { error: f32 },
}

#[derive(Debug)]
pub struct ClientSync {
    config: NetConfig,
    connection: Option<ConnectionId>,
    local: Option<EntityId>,
    body: Body,
    dt: f32,
    /// Applied views, oldest first; deltas are applied on top of the view
    /// at their baseline tick.
    history: VecDeque<(Tick, WorldView)>,
    pending: VecDeque<InputFrame>,
    next_seq: u32,
    predicted: Option<Vec2>,
    request_full: bool,
    corrections: u64,
    desyncs: u64,
}

impl ClientSync {
    pub fn new(config: NetConfig) -> Self {
        Self {
            config,
            connection: None,
            local: None,
            body: Body::default(),
            dt: 0.05,
            history: VecDeque::new(),
            pending: VecDeque::new(),
            next_seq: 1,
            predicted: None,
            request_full: false,
            corrections: 0,
            desyncs: 0,
        }
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn local_entity(&self) -> Option<EntityId> {
        self.local
    }

    pub fn predicted_position(&self) -> Option<Vec2> {
        self.predicted
    }

    pub fn last_server_tick(&self) -> Option<Tick> {
        self.history.back().map(|(t, _)| *t)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&EntityId, &ClientEntity)> {
        self.history.back().into_iter().flat_map(|(_, view)| view.iter())
    }

    pub fn entity(&self, id: EntityId) -> Option<&ClientEntity> {
        self.history.back().and_then(|(_, view)| view.get(&id))
    }

    pub fn pending_inputs(&self) -> usize {
        self.pending.len()
    }

    pub fn wants_full_state(&self) -> bool {
        self.request_full
    }

    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    pub fn desyncs(&self) -> u64 {
        self.desyncs
    }

    /// Records a local input, advances the prediction by one tick and
    /// returns the frame to send.
    pub fn predict(&mut self, movement: Vec2, attack: bool) -> InputFrame {
        let frame = InputFrame {
            seq: self.next_seq,
            movement,
            attack,
        };
        self.next_seq += 1;
        if self.pending.len() >= self.config.input_buffer {
            warn!(seq = frame.seq, "too many unacknowledged inputs, dropping oldest");
            self.pending.pop_front();
        }
        self.pending.push_back(frame);
        if let Some(pos) = self.predicted {
            self.predicted = Some(integrate_intent(pos, &frame.intent(), &self.body, self.dt));
        }
        frame
    }

    /// The message to send this tick: the ack, every unacknowledged input
    /// and a resync request if one is outstanding.
    pub fn outgoing(&self) -> ClientMessage {
        ClientMessage {
            ack_tick: self.last_server_tick(),
            inputs: self.pending.iter().copied().collect(),
            request_full: self.request_full,
        }
    }

    pub fn handle(&mut self, message: ServerMessage) -> Result<Reconciled, NetError> {
        match message {
            ServerMessage::Welcome {
                connection,
                entity,
                dt,
                body,
                ..
            } => {
                self.connection = Some(connection);
                self.local = Some(entity);
                self.dt = dt;
                self.body = body;
                self.history.clear();
                self.pending.clear();
                self.predicted = None;
                self.request_full = false;
                Ok(Reconciled::Welcomed)
            }
            ServerMessage::Update(update) => self.apply(update),
        }
    }

    fn apply(&mut self, update: UpdateMessage) -> Result<Reconciled, NetError> {
        let tick = update.server_tick;
        if self.last_server_tick().is_some_and(|last| tick <= last) {
            debug!(tick, "stale or duplicate update dropped");
            return Ok(Reconciled::Stale);
        }
        let mut view = match update.baseline_tick {
            None => WorldView::new(),
            Some(base) => match self.history.iter().find(|(t, _)| *t == base) {
                Some((_, view)) => view.clone(),
                None => {
                    warn!(tick, base, "delta baseline unknown, requesting full state");
                    self.request_full = true;
                    return Ok(Reconciled::MissingBaseline);
                }
            },
        };
        for id in &update.removed {
            view.remove(id);
        }
        for delta in &update.entities {
            match view.get_mut(&delta.entity) {
                Some(entity) => {
                    // Views only hold ticks older than `tick`: stale updates
                    // were dropped above.
                    debug_assert!(entity.updated <= tick);
                    for c in &delta.components {
                        entity.state.apply(c);
                    }
                    entity.updated = tick;
                }
                None => {
                    let Some(archetype) = delta.archetype else {
                        debug!(entity = %delta.entity, "delta for unknown entity, requesting full state");
                        self.request_full = true;
                        continue;
                    };
                    let mut state = EntityState {
                        archetype,
                        transform: None,
                        velocity: None,
                        health: None,
                        visual: None,
                    };
                    for c in &delta.components {
                        state.apply(c);
                    }
                    view.insert(delta.entity, ClientEntity { state, updated: tick });
                }
            }
        }
        if update.is_full() {
            self.request_full = false;
        }
        self.history.push_back((tick, view));
        while self.history.len() > self.config.retention_ticks {
            self.history.pop_front();
        }
        self.pending.retain(|f| f.seq > update.last_input_seq);
        self.reconcile()
    }

    /// Replays unacknowledged inputs on top of the authoritative position
    /// and snaps the prediction if it drifted past the tolerance.
    fn reconcile(&mut self) -> Result<Reconciled, NetError> {
        let Some(local) = self.local else {
            return Ok(Reconciled::Accepted);
        };
        let Some(authoritative) = self.entity(local).and_then(|e| e.state.transform).map(|t| t.position) else {
            return Ok(Reconciled::Accepted);
        };
        let replayed = self.pending.iter().fold(authoritative, |pos, frame| {
            integrate_intent(pos, &frame.intent(), &self.body, self.dt)
        });
        let Some(predicted) = self.predicted else {
            self.predicted = Some(replayed);
            return Ok(Reconciled::Accepted);
        };
        let error = predicted.distance(replayed);
        if error > self.config.desync_threshold {
            self.predicted = Some(replayed);
            self.request_full = true;
            self.desyncs += 1;
            warn!(entity = %local, error, "prediction desync, requesting full state");
            return Err(NetError::NetworkDesync { entity: local, error });
        }
        if error > self.config.reconciliation_tolerance {
            self.predicted = Some(replayed);
            self.corrections += 1;
            debug!(entity = %local, error, "prediction corrected");
            return Ok(Reconciled::Corrected { error });
        }
        Ok(Reconciled::Accepted)
    }
}
