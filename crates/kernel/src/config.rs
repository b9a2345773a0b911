use crate::error::SimError;
use crate::scheduler::SchedulerConfig;
use emberfall_ai::AiConfig;
use emberfall_common::{ArchetypeId, WorldScale};
use emberfall_net::NetConfig;
use emberfall_physics::PhysicsConfig;
use emberfall_stream::StreamConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Log a summary line every this many ticks; zero disables it.
    pub summary_every: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            summary_every: 200,
        }
    }
}

/// Complete simulation configuration. Every field has a default, so an
/// empty JSON object is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seconds per tick.
    pub dt: f32,
    pub world: WorldScale,
    /// Archetype spawned for each connecting player.
    pub player_archetype: ArchetypeId,
    /// Asset catalog JSON; the built-in catalog when absent.
    pub catalog_path: Option<PathBuf>,
    /// Chunk store directory; chunks live in memory when absent.
    pub storage_path: Option<PathBuf>,
    pub scheduler: SchedulerConfig,
    pub stream: StreamConfig,
    pub ai: AiConfig,
    pub physics: PhysicsConfig,
    pub net: NetConfig,
    pub logging: LoggingConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            dt: 0.05,
            world: WorldScale::default(),
            player_archetype: ArchetypeId(0),
            catalog_path: None,
            storage_path: None,
            scheduler: SchedulerConfig::default(),
            stream: StreamConfig::default(),
            ai: AiConfig::default(),
            physics: PhysicsConfig::default(),
            net: NetConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SimError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SimConfig = serde_json::from_str(&text).map_err(|source| SimError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, SimError> {
        serde_json::to_string_pretty(self).map_err(|e| SimError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if !(self.dt > 0.0 && self.dt <= 1.0) {
            return Err(SimError::InvalidConfig("dt must be within (0, 1]".into()));
        }
        if !(self.world.tile_size > 0.0) || self.world.chunk_tiles == 0 {
            return Err(SimError::InvalidConfig("world scale must be positive".into()));
        }
        self.stream.validate().map_err(SimError::InvalidConfig)?;
        self.ai.validate().map_err(SimError::InvalidConfig)?;
        self.physics.validate().map_err(SimError::InvalidConfig)?;
        self.net.validate().map_err(SimError::InvalidConfig)?;
        Ok(())
    }

    /// In-memory storage, inline chunk I/O and serial systems: every run
    /// with the same inputs produces the same states.
    pub fn deterministic() -> Self {
        let mut config = Self::default();
        config.stream.io_workers = 0;
        config.scheduler.parallel = false;
        config
    }
}
