//! Component store and system contract for the simulation core.
//!
//! Entities are generation-counted ids; components live in one sparse-set
//! column per type, each behind a non-poisoning `RwLock` so that systems in
//! the same scheduler stage can borrow disjoint columns concurrently.
//!
//! # Invariants
//! - Every live entity carries exactly the components of its archetype.
//! - An id+generation pair is never reissued after despawn.
//! - Queries yield entities in ascending index order.
//! - Column guards handed to a system never outlive its `SystemContext`.

mod archetype;
mod column;
mod command;
mod component;
mod entity;
mod error;
mod frame;
mod path;
mod store;
mod system;

pub use archetype::{ArchetypeKind, ArchetypeTemplate};
pub use column::Column;
pub use command::{Applied, Command, CommandBuffer};
pub use component::{
    AiMode, AnimationState, Body, Brain, Columns, Combat, Component, ComponentKind, ComponentMask,
    ComponentSnapshot, Health, Intent, NetworkId, Projectile, RenderLayer, StateHash, Transform,
    Velocity, Visual,
};
pub use entity::{EntityAllocator, EntityId};
pub use error::EcsError;
pub use frame::{VisualEntity, VisualFrame};
pub use path::{OpenEntry, PathState, SearchState};
pub use store::{ComponentStore, Query};
pub use system::{Access, Resources, System, SystemContext, SystemError};

pub fn crate_info() -> &'static str {
    "emberfall-ecs v0.1.0"
}
