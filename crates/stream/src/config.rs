use serde::{Deserialize, Serialize};

/// Streaming configuration: view and awareness radii plus per-tick budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Radius in world units around each player whose chunks are loaded.
    pub view_radius: f32,
    /// Unloaded chunks within this radius keep coarse LOD summaries.
    pub awareness_radius: f32,
    /// Maximum new load requests per tick.
    pub load_budget: usize,
    /// Storage worker threads. Zero runs storage calls inline, which makes
    /// chunk arrival tick-exact for replays.
    pub io_workers: usize,
    /// Capacity of each worker's request queue.
    pub request_capacity: usize,
    /// Capacity of the event queue back to the simulation.
    pub event_capacity: usize,
    /// Ticks a chunk stays active after the last player stopped seeing it.
    pub grace_ticks: u64,
    pub max_load_attempts: u32,
    /// First retry delay; doubles with every failed attempt.
    pub retry_backoff_ticks: u64,
    /// Above this many resident chunks, unwanted chunks are unloaded before
    /// their grace period ends.
    pub max_resident_chunks: usize,
    /// Seed for generated chunk content.
    pub world_seed: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            view_radius: 24.0,
            awareness_radius: 64.0,
            load_budget: 4,
            io_workers: 2,
            request_capacity: 32,
            event_capacity: 256,
            grace_ticks: 60,
            max_load_attempts: 3,
            retry_backoff_ticks: 10,
            max_resident_chunks: 64,
            world_seed: 0x00e3_be4f_a11a,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.view_radius > 0.0) {
            return Err("stream.view_radius must be positive".into());
        }
        if self.awareness_radius < self.view_radius {
            return Err("stream.awareness_radius must be at least view_radius".into());
        }
        if self.load_budget == 0 || self.request_capacity == 0 || self.event_capacity == 0 {
            return Err("stream budgets and capacities must be positive".into());
        }
        if self.max_load_attempts == 0 {
            return Err("stream.max_load_attempts must be at least 1".into());
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(16);
        self.retry_backoff_ticks.saturating_mul(1 << shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let cfg = StreamConfig {
            retry_backoff_ticks: 5,
            ..StreamConfig::default()
        };
        assert_eq!(cfg.backoff(1), 5);
        assert_eq!(cfg.backoff(2), 10);
        assert_eq!(cfg.backoff(3), 20);
    }

    #[test]
    fn awareness_must_cover_view() {
        let cfg = StreamConfig {
            awareness_radius: 1.0,
            ..StreamConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(StreamConfig::default().validate().is_ok());
    }
}
