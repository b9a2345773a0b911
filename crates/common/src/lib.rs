//! Shared types for the emberfall simulation core.
//!
//! Everything here is plain data that crosses crate boundaries: identifiers
//! that break the entity/chunk/connection reference cycles, the world grid
//! geometry, and the deterministic hash and RNG helpers that every crate
//! relies on for bitwise-stable behavior.

mod hash;
mod rng;
mod types;

pub use hash::Fnv1a;
pub use rng::{DetRng, splitmix64};
pub use types::{
    ArchetypeId, BehaviorId, ChunkCoord, ConnectionId, GeometryId, Tick, TileCoord, WorldScale,
};

pub fn crate_info() -> &'static str {
    "emberfall-common v0.1.0"
}
