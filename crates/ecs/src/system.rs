//! The contract between systems and the scheduler.

use crate::column::Column;
use crate::command::CommandBuffer;
use crate::component::{Component, ComponentKind, ComponentMask};
use crate::entity::EntityId;
use crate::error::EcsError;
use crate::store::{ComponentStore, Query};
use emberfall_common::Tick;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Columns a system reads and writes. Used to compute stages and enforced
/// at runtime by `SystemContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Access {
    pub reads: ComponentMask,
    pub writes: ComponentMask,
}

impl Access {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn read(mut self, kind: ComponentKind) -> Self {
        self.reads = self.reads.with(kind);
        self
    }

    #[must_use]
    pub fn write(mut self, kind: ComponentKind) -> Self {
        self.writes = self.writes.with(kind);
        self
    }

    /// Write/write or read/write overlap in either direction.
    pub fn conflicts_with(&self, other: &Access) -> bool {
        self.writes.intersects(other.writes)
            || self.writes.intersects(other.reads)
            || self.reads.intersects(other.writes)
    }

    pub fn can_read(&self, kind: ComponentKind) -> bool {
        self.reads.contains(kind) || self.writes.contains(kind)
    }

    pub fn can_write(&self, kind: ComponentKind) -> bool {
        self.writes.contains(kind)
    }
}

/// Type-keyed bag of read-only shared data (terrain, inputs, config).
///
/// Mutated only between ticks by the owner of the simulation.
#[derive(Default)]
pub struct Resources {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<R: Any + Send + Sync>(&mut self, value: R) {
        self.map.insert(TypeId::of::<R>(), Box::new(value));
    }

    pub fn get<R: Any + Send + Sync>(&self) -> Option<&R> {
        self.map.get(&TypeId::of::<R>()).and_then(|b| b.downcast_ref())
    }

    pub fn get_mut<R: Any + Send + Sync>(&mut self) -> Option<&mut R> {
        self.map.get_mut(&TypeId::of::<R>()).and_then(|b| b.downcast_mut())
    }

    pub fn remove<R: Any + Send + Sync>(&mut self) -> Option<R> {
        self.map
            .remove(&TypeId::of::<R>())
            .and_then(|b| b.downcast::<R>().ok())
            .map(|b| *b)
    }
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources").field("len", &self.map.len()).finish()
    }
}

/// Everything a system sees during one execution.
pub struct SystemContext<'a> {
    store: &'a ComponentStore,
    resources: &'a Resources,
    access: Access,
    system: &'a str,
    pub tick: Tick,
    /// Fixed timestep in seconds.
    pub dt: f32,
}

impl<'a> SystemContext<'a> {
    pub fn new(
        store: &'a ComponentStore,
        resources: &'a Resources,
        access: Access,
        system: &'a str,
        tick: Tick,
        dt: f32,
    ) -> Self {
        Self {
            store,
            resources,
            access,
            system,
            tick,
            dt,
        }
    }

    fn undeclared(&self, kind: ComponentKind, mode: &'static str) -> EcsError {
        EcsError::UndeclaredAccess {
            system: self.system.to_string(),
            kind,
            mode,
        }
    }

    pub fn read<T: Component>(&self) -> Result<RwLockReadGuard<'_, Column<T>>, EcsError> {
        if !self.access.can_read(T::KIND) {
            return Err(self.undeclared(T::KIND, "read"));
        }
        Ok(T::column(self.store.columns()).read())
    }

    pub fn write<T: Component>(&self) -> Result<RwLockWriteGuard<'_, Column<T>>, EcsError> {
        if !self.access.can_write(T::KIND) {
            return Err(self.undeclared(T::KIND, "write"));
        }
        Ok(T::column(self.store.columns()).write())
    }

    /// Visible entities matching `mask`. Querying a kind outside the access
    /// set is an error like any other undeclared access.
    pub fn query(&self, mask: ComponentMask) -> Result<Query<'_>, EcsError> {
        let allowed = self.access.reads.union(self.access.writes);
        if let Some(kind) = mask.difference(allowed).kinds().next() {
            return Err(self.undeclared(kind, "read"));
        }
        Ok(self.store.query(mask))
    }

    /// Structural facts that need no column access.
    pub fn contains(&self, id: EntityId) -> bool {
        self.store.contains(id)
    }

    pub fn has(&self, id: EntityId, kind: ComponentKind) -> bool {
        self.store.has(id, kind)
    }

    pub fn resource<R: Any + Send + Sync>(&self) -> Option<&R> {
        self.resources.get::<R>()
    }

    pub fn system_name(&self) -> &str {
        self.system
    }
}

/// Errors a system can return. The scheduler contains them.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error(transparent)]
    Ecs(#[from] EcsError),
    #[error("missing resource {0}")]
    MissingResource(&'static str),
    #[error("{0}")]
    Failed(String),
}

/// A unit of per-tick logic with a declared access set.
pub trait System: Send {
    fn name(&self) -> &str;

    fn access(&self) -> Access;

    fn run(&mut self, ctx: &SystemContext<'_>, commands: &mut CommandBuffer) -> Result<(), SystemError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_rules() {
        use ComponentKind::*;
        let w_health = Access::new().write(Health);
        let r_health = Access::new().read(Health);
        let r_transform = Access::new().read(Transform);
        assert!(w_health.conflicts_with(&w_health));
        assert!(w_health.conflicts_with(&r_health));
        assert!(r_health.conflicts_with(&w_health));
        assert!(!r_health.conflicts_with(&r_health));
        assert!(!w_health.conflicts_with(&r_transform));
    }

    #[test]
    fn resources_by_type() {
        let mut res = Resources::new();
        res.insert(5u32);
        res.insert(String::from("x"));
        assert_eq!(res.get::<u32>(), Some(&5));
        *res.get_mut::<u32>().unwrap() = 6;
        assert_eq!(res.remove::<u32>(), Some(6));
        assert!(res.get::<u32>().is_none());
        assert_eq!(res.get::<String>().map(String::as_str), Some("x"));
    }

    #[test]
    fn undeclared_access_is_rejected() {
        let store = ComponentStore::new();
        let res = Resources::new();
        let access = Access::new().read(ComponentKind::Transform);
        let ctx = SystemContext::new(&store, &res, access, "probe", 0, 0.05);
        assert!(ctx.read::<crate::Transform>().is_ok());
        assert!(matches!(
            ctx.write::<crate::Transform>(),
            Err(EcsError::UndeclaredAccess { mode: "write", .. })
        ));
        assert!(ctx.read::<crate::Health>().is_err());
        assert!(ctx.query(ComponentMask::of(&[ComponentKind::Brain])).is_err());
    }
}
