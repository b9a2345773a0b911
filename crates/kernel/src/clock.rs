//! Fixed-timestep time keeping.

use emberfall_common::Tick;
use std::time::Duration;
use tracing::warn;

/// Simulation time as a whole number of fixed steps. Time is always
/// `tick * dt`; nothing is accumulated in floating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimClock {
    tick: Tick,
    dt: f32,
}

impl SimClock {
    pub fn new(dt: f32) -> Self {
        Self { tick: 0, dt }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Seconds of simulated time.
    pub fn time(&self) -> f64 {
        self.tick as f64 * self.dt as f64
    }

    pub fn advance(&mut self) -> Tick {
        self.tick += 1;
        self.tick
    }
}

/// Converts wall-clock time into whole simulation steps.
///
/// When the host falls behind, at most `max_catch_up` steps are released per
/// call and the rest of the backlog is dropped.
#[derive(Debug)]
pub struct FixedStepper {
    step: Duration,
    max_catch_up: u32,
    accumulator: Duration,
    dropped_steps: u64,
}

impl FixedStepper {
    pub fn new(step: Duration, max_catch_up: u32) -> Self {
        Self {
            step: step.max(Duration::from_micros(1)),
            max_catch_up: max_catch_up.max(1),
            accumulator: Duration::ZERO,
            dropped_steps: 0,
        }
    }

    /// Adds elapsed wall time and returns how many steps to run now.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        self.accumulator += elapsed;
        let mut due = 0u64;
        while self.accumulator >= self.step {
            self.accumulator -= self.step;
            due += 1;
        }
        if due > self.max_catch_up as u64 {
            let dropped = due - self.max_catch_up as u64;
            self.dropped_steps += dropped;
            warn!(dropped, "simulation fell behind, dropping steps");
            due = self.max_catch_up as u64;
        }
        due as u32
    }

    /// Fraction of a step accumulated but not yet run, for interpolation.
    pub fn alpha(&self) -> f32 {
        self.accumulator.as_secs_f32() / self.step.as_secs_f32()
    }

    /// Time until the next step is due.
    pub fn until_next(&self) -> Duration {
        self.step.saturating_sub(self.accumulator)
    }

    pub fn dropped_steps(&self) -> u64 {
        self.dropped_steps
    }
}
