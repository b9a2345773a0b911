//! Simulation kernel: the scheduler, the fixed-step clock and the per-tick
//! orchestration of streaming, systems and replication.
//!
//! One tick runs, in order: streaming events, inbound client input, terrain
//! refresh, all systems, command application, chunk membership, streaming
//! decisions, integrity check, frame publication, outbound replication and
//! connection timeouts.
//!
//! # Invariants
//! - The component store is only mutated on the simulation thread, between
//!   or after system stages.
//! - Commands are applied in system declaration order regardless of which
//!   thread ran which system.
//! - A store integrity violation stops the simulation; every other failure
//!   is logged and absorbed.

mod clock;
mod config;
mod error;
mod scheduler;
mod simulation;

pub use clock::{FixedStepper, SimClock};
pub use config::{LoggingConfig, SimConfig};
pub use error::SimError;
pub use scheduler::{Scheduler, SchedulerConfig, StageReport, SystemFault};
pub use simulation::{Simulation, TickReport};

pub fn crate_info() -> &'static str {
    "emberfall-kernel v0.1.0"
}
