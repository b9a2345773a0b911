//! Messages exchanged between server and clients, encoded as CBOR.

use crate::error::NetError;
use emberfall_common::{ArchetypeId, ConnectionId, Tick};
use emberfall_ecs::{Body, EntityId, Health, Intent, Transform, Velocity, Visual};
use glam::Vec2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputFrame {
    /// Per-connection sequence number, starting at 1.
    pub seq: u32,
    pub movement: Vec2,
    pub attack: bool,
}

impl InputFrame {
    /// The intent this frame drives, identical on server and client.
    pub fn intent(&self) -> Intent {
        let mut intent = if self.movement.length_squared() > 0.0 {
            Intent::walk(self.movement, self.movement.length().min(1.0))
        } else {
            Intent::idle()
        };
        intent.attack = self.attack;
        intent
    }
}

/// Replicated component state. Each variant carries the full component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ComponentDelta {
    Transform(Transform),
    Velocity(Velocity),
    Health(Health),
    Visual(Visual),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDelta {
    pub entity: EntityId,
    /// Present when the receiver is not assumed to know the entity yet.
    pub archetype: Option<ArchetypeId>,
    pub components: Vec<ComponentDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessage {
    pub server_tick: Tick,
    /// Snapshot the delta was computed against; `None` for a full state.
    pub baseline_tick: Option<Tick>,
    pub entities: Vec<EntityDelta>,
    pub removed: Vec<EntityId>,
    /// Highest input sequence the server has applied for this connection.
    pub last_input_seq: u32,
}

impl UpdateMessage {
    pub fn is_full(&self) -> bool {
        self.baseline_tick.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Welcome {
        connection: ConnectionId,
        entity: EntityId,
        tick: Tick,
        /// Fixed step and body the client predicts with.
        dt: f32,
        body: Body,
    },
    Update(UpdateMessage),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Latest server tick the client applied.
    pub ack_tick: Option<Tick>,
    /// Every input not yet acknowledged, oldest first.
    pub inputs: Vec<InputFrame>,
    pub request_full: bool,
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, NetError> {
    let mut out = Vec::new();
    ciborium::into_writer(message, &mut out).map_err(|e| NetError::Encode(e.to_string()))?;
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, NetError> {
    ciborium::from_reader(data).map_err(|e| NetError::Decode(e.to_string()))
}
