//! Physics and movement resolution.
//!
//! Movement is resolved strictly in entity id order using only basic f32
//! arithmetic, so the same inputs produce bitwise identical positions on
//! every run.
//!
//! # Invariants
//! - Tiles outside active chunks are solid; nothing moves into unloaded space.
//! - A resolved actor never ends a tick overlapping a solid tile.

mod animation;
mod combat;
mod config;
mod movement;
mod regen;
mod terrain;

pub use animation::{AnimationSystem, animation_for};
pub use combat::CombatSystem;
pub use config::PhysicsConfig;
pub use movement::{MovementSystem, integrate_intent, resolve_against_terrain};
pub use regen::RegenSystem;
pub use terrain::TerrainView;

pub fn crate_info() -> &'static str {
    "emberfall-physics v0.1.0"
}
