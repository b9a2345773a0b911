use crate::entity::EntityId;

/// Sparse-set storage for one component type.
///
/// `sparse` maps an entity index to a slot in the dense arrays. Lookups
/// compare the full id, so a stale handle never reads a recycled slot.
#[derive(Debug)]
pub struct Column<T> {
    sparse: Vec<Option<u32>>,
    ids: Vec<EntityId>,
    data: Vec<T>,
}

impl<T> Default for Column<T> {
    fn default() -> Self {
        Self {
            sparse: Vec::new(),
            ids: Vec::new(),
            data: Vec::new(),
        }
    }
}

impl<T> Column<T> {
    fn slot(&self, id: EntityId) -> Option<usize> {
        let slot = (*self.sparse.get(id.index() as usize)?)? as usize;
        (self.ids[slot] == id).then_some(slot)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.slot(id).is_some()
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.slot(id).map(|s| &self.data[s])
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.slot(id).map(|s| &mut self.data[s])
    }

    /// Inserts or replaces the value for `id`.
    pub fn insert(&mut self, id: EntityId, value: T) {
        if let Some(slot) = self.slot(id) {
            self.data[slot] = value;
            return;
        }
        let idx = id.index() as usize;
        if self.sparse.len() <= idx {
            self.sparse.resize(idx + 1, None);
        }
        self.sparse[idx] = Some(self.ids.len() as u32);
        self.ids.push(id);
        self.data.push(value);
    }

    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        let slot = self.slot(id)?;
        self.sparse[id.index() as usize] = None;
        self.ids.swap_remove(slot);
        let value = self.data.swap_remove(slot);
        if let Some(moved) = self.ids.get(slot) {
            self.sparse[moved.index() as usize] = Some(slot as u32);
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids stored in this column, in dense (unspecified) order.
    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }
}
