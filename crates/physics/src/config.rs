use emberfall_common::ArchetypeId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Archetype spawned by ranged attacks.
    pub projectile_archetype: ArchetypeId,
    /// Ticks the hurt animation is held after a hit.
    pub hurt_ticks: u64,
    /// Speed fraction above which a moving actor is running.
    pub run_fraction: f32,
    /// Broadphase cell edge in world units. Must exceed the largest body
    /// diameter plus one tick of movement.
    pub broadphase_cell: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            projectile_archetype: ArchetypeId(4),
            hurt_ticks: 10,
            run_fraction: 0.75,
            broadphase_cell: 4.0,
        }
    }
}

impl PhysicsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.broadphase_cell > 0.0) {
            return Err("physics.broadphase_cell must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.run_fraction) {
            return Err("physics.run_fraction must be within [0, 1]".into());
        }
        Ok(())
    }
}
