//! Asset and configuration loading for the simulation core.
//!
//! The catalog is the only thing the simulation learns from content files:
//! archetype templates, static chunk geometry and the rules that seed a
//! chunk the first time it is visited. Everything is validated when the
//! catalog is built; a malformed template or geometry never reaches a tick.

pub mod builtin;
mod catalog;
mod geometry;

pub use catalog::{
    AssetCatalog, AssetError, BlueprintSpawn, ChunkBlueprint, ChunkSeed, PopulationRule, SeedSpawn,
};
pub use geometry::{ChunkGeometry, TileKind};

pub fn crate_info() -> &'static str {
    "emberfall-assets v0.1.0"
}
