use crate::archetype::{ArchetypeKind, ArchetypeTemplate};
use crate::column::Column;
use crate::component::{Columns, Component, ComponentKind, ComponentMask, ComponentSnapshot};
use crate::entity::{EntityAllocator, EntityId};
use crate::error::EcsError;
use emberfall_common::{ArchetypeId, Fnv1a};
use parking_lot::{MappedRwLockReadGuard, RwLockReadGuard};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
struct EntityMeta {
    id: EntityId,
    archetype: ArchetypeId,
    mask: ComponentMask,
    suspended: bool,
}

/// Owner of all entity and component state.
///
/// Structural changes (spawn, despawn, suspension) need `&mut self` and so
/// only happen between scheduler stages. Systems borrow columns through
/// `SystemContext`, which holds a shared reference.
#[derive(Debug, Default)]
pub struct ComponentStore {
    allocator: EntityAllocator,
    metas: Vec<Option<EntityMeta>>,
    columns: Columns,
    archetypes: BTreeMap<ArchetypeId, ArchetypeTemplate>,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_archetype(&mut self, template: ArchetypeTemplate) -> Result<(), EcsError> {
        template.validate()?;
        tracing::debug!(id = ?template.id, name = %template.name, "archetype registered");
        self.archetypes.insert(template.id, template);
        Ok(())
    }

    pub fn archetype(&self, id: ArchetypeId) -> Option<&ArchetypeTemplate> {
        self.archetypes.get(&id)
    }

    pub fn spawn(&mut self, archetype: ArchetypeId) -> Result<EntityId, EcsError> {
        self.spawn_with(archetype, ComponentSnapshot::default())
    }

    /// Spawns an entity with the archetype defaults replaced by whatever
    /// `overrides` carries. Overrides outside the archetype are rejected.
    pub fn spawn_with(
        &mut self,
        archetype: ArchetypeId,
        overrides: ComponentSnapshot,
    ) -> Result<EntityId, EcsError> {
        let template = self
            .archetypes
            .get(&archetype)
            .ok_or(EcsError::UnknownArchetype(archetype))?;
        let mask = template.mask();
        if let Some(kind) = overrides.mask().difference(mask).kinds().next() {
            return Err(EcsError::UnexpectedComponent {
                archetype: template.name.clone(),
                kind,
            });
        }
        let mut components = template.defaults.clone();
        components.overlay(overrides);

        let id = self.allocator.allocate();
        let idx = id.index() as usize;
        if self.metas.len() <= idx {
            self.metas.resize(idx + 1, None);
        }
        self.metas[idx] = Some(EntityMeta {
            id,
            archetype,
            mask,
            suspended: false,
        });
        self.columns.insert_snapshot(id, components);
        Ok(id)
    }

    /// Removes the entity and returns the components it carried.
    pub fn despawn(&mut self, id: EntityId) -> Result<ComponentSnapshot, EcsError> {
        if !self.allocator.deallocate(id) {
            return Err(EcsError::UnknownEntity(id));
        }
        self.metas[id.index() as usize] = None;
        Ok(self.columns.remove_all(id))
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.allocator.is_alive(id)
    }

    fn meta(&self, id: EntityId) -> Result<&EntityMeta, EcsError> {
        match self.metas.get(id.index() as usize) {
            Some(Some(meta)) if meta.id == id => Ok(meta),
            _ => Err(EcsError::UnknownEntity(id)),
        }
    }

    pub fn get<T: Component>(&self, id: EntityId) -> Result<MappedRwLockReadGuard<'_, T>, EcsError> {
        self.meta(id)?;
        RwLockReadGuard::try_map(T::column(&self.columns).read(), |c| c.get(id)).map_err(|_| {
            EcsError::ComponentMissing {
                entity: id,
                kind: T::KIND,
            }
        })
    }

    pub fn get_mut<T: Component>(&mut self, id: EntityId) -> Result<&mut T, EcsError> {
        self.meta(id)?;
        T::column_mut(&mut self.columns)
            .get_mut()
            .get_mut(id)
            .ok_or(EcsError::ComponentMissing {
                entity: id,
                kind: T::KIND,
            })
    }

    /// Read guard over a whole column, for consumers outside the scheduler.
    pub fn column<T: Component>(&self) -> RwLockReadGuard<'_, Column<T>> {
        T::column(&self.columns).read()
    }

    pub(crate) fn columns(&self) -> &Columns {
        &self.columns
    }

    /// Visible entities carrying every component in `mask`, ascending by index.
    pub fn query(&self, mask: ComponentMask) -> Query<'_> {
        Query {
            metas: &self.metas,
            cursor: 0,
            mask,
            include_suspended: false,
        }
    }

    pub fn query_including_suspended(&self, mask: ComponentMask) -> Query<'_> {
        Query {
            include_suspended: true,
            ..self.query(mask)
        }
    }

    pub fn set_suspended(&mut self, id: EntityId, suspended: bool) -> Result<(), EcsError> {
        self.meta(id)?;
        if let Some(Some(meta)) = self.metas.get_mut(id.index() as usize) {
            meta.suspended = suspended;
        }
        Ok(())
    }

    pub fn is_suspended(&self, id: EntityId) -> Result<bool, EcsError> {
        Ok(self.meta(id)?.suspended)
    }

    pub fn capture(&self, id: EntityId) -> Result<ComponentSnapshot, EcsError> {
        self.meta(id)?;
        Ok(self.columns.capture(id))
    }

    pub fn archetype_of(&self, id: EntityId) -> Result<ArchetypeId, EcsError> {
        Ok(self.meta(id)?.archetype)
    }

    pub fn kind_of(&self, id: EntityId) -> Result<ArchetypeKind, EcsError> {
        let archetype = self.archetype_of(id)?;
        self.archetypes
            .get(&archetype)
            .map(|t| t.kind)
            .ok_or(EcsError::UnknownArchetype(archetype))
    }

    pub fn len(&self) -> usize {
        self.allocator.alive_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that every live entity matches its archetype and that the
    /// columns hold nothing for dead ids.
    pub fn verify_integrity(&self) -> Result<(), EcsError> {
        let mut live = 0usize;
        for meta in self.metas.iter().flatten() {
            live += 1;
            if !self.allocator.is_alive(meta.id) {
                return Err(EcsError::Corruption(format!("{} indexed but not alive", meta.id)));
            }
            let template = self.archetypes.get(&meta.archetype).ok_or_else(|| {
                EcsError::Corruption(format!("{} has unknown archetype {:?}", meta.id, meta.archetype))
            })?;
            let actual = self.columns.mask_of(meta.id);
            if actual != template.mask() || actual != meta.mask {
                return Err(EcsError::Corruption(format!(
                    "{} component set {:?} does not match archetype '{}'",
                    meta.id, actual, template.name
                )));
            }
        }
        if live != self.allocator.alive_count() {
            return Err(EcsError::Corruption(format!(
                "allocator reports {} live entities, index holds {live}",
                self.allocator.alive_count()
            )));
        }
        if let Some((id, kind)) = self
            .columns
            .all_entries()
            .into_iter()
            .find(|(id, _)| !self.allocator.is_alive(*id))
        {
            return Err(EcsError::Corruption(format!("orphaned {kind:?} for dead {id}")));
        }
        Ok(())
    }

    /// FNV-1a over every entity and component in index order.
    pub fn state_hash(&self) -> u64 {
        let mut h = Fnv1a::new();
        h.write_u64(self.len() as u64);
        for meta in self.metas.iter().flatten() {
            h.write_u64(meta.id.to_raw());
            h.write_u32(meta.archetype.0 as u32);
            h.write_u8(meta.suspended as u8);
            self.columns.hash_entity(meta.id, &mut h);
        }
        h.finish()
    }

    /// Whether `kind` is stored for `id`. Dead ids report `false`.
    pub fn has(&self, id: EntityId, kind: ComponentKind) -> bool {
        self.meta(id).is_ok_and(|m| m.mask.contains(kind))
    }
}

/// Lazy iterator over matching entity ids. Each call to `query` starts over.
pub struct Query<'a> {
    metas: &'a [Option<EntityMeta>],
    cursor: usize,
    mask: ComponentMask,
    include_suspended: bool,
}

impl Iterator for Query<'_> {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        while let Some(slot) = self.metas.get(self.cursor) {
            self.cursor += 1;
            if let Some(meta) = slot {
                if meta.mask.contains_all(self.mask) && (self.include_suspended || !meta.suspended) {
                    return Some(meta.id);
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.metas.len().saturating_sub(self.cursor)))
    }
}
