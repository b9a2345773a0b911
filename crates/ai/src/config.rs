use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Radius in world units within which NPCs notice players.
    pub detection_radius: f32,
    /// Health fraction below which hostile NPCs flee.
    pub flee_health: f32,
    /// A* node expansions one NPC may spend per tick.
    pub expansions_per_tick: u32,
    /// A* node expansions all NPCs together may spend per tick.
    pub global_expansions_per_tick: u32,
    /// Expansions after which a single search gives up.
    pub max_expansions: u32,
    /// Ticks an NPC idles or patrols after a failed search.
    pub fallback_ticks: u64,
    /// A moving goal within this many tiles of the current one keeps the
    /// current path.
    pub repath_tiles: u32,
    /// Distance from home beyond which NPCs walk back.
    pub leash_radius: f32,
    /// Radius around home that wandering villagers stay within.
    pub wander_radius: f32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            detection_radius: 10.0,
            flee_health: 0.25,
            expansions_per_tick: 64,
            global_expansions_per_tick: 4096,
            max_expansions: 4096,
            fallback_ticks: 60,
            repath_tiles: 2,
            leash_radius: 14.0,
            wander_radius: 6.0,
        }
    }
}

impl AiConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.expansions_per_tick == 0 || self.max_expansions == 0 {
            return Err("ai expansion budgets must be positive".into());
        }
        if !(self.detection_radius > 0.0) {
            return Err("ai.detection_radius must be positive".into());
        }
        Ok(())
    }
}
