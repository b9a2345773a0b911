use emberfall_common::ArchetypeId;
use serde::{Deserialize, Serialize};

/// What happens to a player's entity when its connection times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisconnectPolicy {
    #[default]
    Despawn,
    /// Replace the player with an NPC of this archetype at the same spot.
    HandToAi { archetype: ArchetypeId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Radius in world units of each connection's interest set.
    pub view_radius: f32,
    /// Sent snapshots kept per connection. An ack older than this gets a
    /// full state instead of a delta.
    pub retention_ticks: usize,
    /// Ticks without an advancing ack before the connection is dropped.
    pub ack_timeout_ticks: u64,
    /// Prediction error, in world units, below which the client keeps its
    /// predicted position.
    pub reconciliation_tolerance: f32,
    /// Prediction error above which the client asks for a full resync.
    pub desync_threshold: f32,
    /// Input frames buffered per connection; newer frames beyond this are
    /// dropped until the backlog drains.
    pub input_buffer: usize,
    /// Capacity of each direction of a link.
    pub link_capacity: usize,
    pub disconnect_policy: DisconnectPolicy,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            view_radius: 24.0,
            retention_ticks: 64,
            ack_timeout_ticks: 600,
            reconciliation_tolerance: 0.05,
            desync_threshold: 4.0,
            input_buffer: 32,
            link_capacity: 64,
            disconnect_policy: DisconnectPolicy::Despawn,
        }
    }
}

impl NetConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.view_radius > 0.0) {
            return Err("net.view_radius must be positive".into());
        }
        if self.retention_ticks == 0 || self.input_buffer == 0 || self.link_capacity == 0 {
            return Err("net buffers must be positive".into());
        }
        if self.ack_timeout_ticks == 0 {
            return Err("net.ack_timeout_ticks must be positive".into());
        }
        if !(self.reconciliation_tolerance >= 0.0) || self.desync_threshold <= self.reconciliation_tolerance {
            return Err("net.desync_threshold must exceed reconciliation_tolerance".into());
        }
        Ok(())
    }
}
