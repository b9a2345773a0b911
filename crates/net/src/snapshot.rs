//! Tick-stamped copies of replicated state and the per-connection ring they
//! are kept in.

use crate::wire::{ComponentDelta, EntityDelta};
use emberfall_common::{ArchetypeId, Tick};
use emberfall_ecs::{ComponentStore, EntityId, Health, Transform, Velocity, Visual};
use std::collections::{BTreeMap, VecDeque};

/// Replicated components of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub archetype: ArchetypeId,
    pub transform: Option<Transform>,
    pub velocity: Option<Velocity>,
    pub health: Option<Health>,
    pub visual: Option<Visual>,
}

impl EntityState {
    fn capture(store: &ComponentStore, id: EntityId) -> Option<Self> {
        let archetype = store.archetype_of(id).ok()?;
        Some(Self {
            archetype,
            transform: store.get::<Transform>(id).ok().map(|c| *c),
            velocity: store.get::<Velocity>(id).ok().map(|c| *c),
            health: store.get::<Health>(id).ok().map(|c| *c),
            visual: store.get::<Visual>(id).ok().map(|c| *c),
        })
    }

    pub fn components(&self) -> Vec<ComponentDelta> {
        let mut out = Vec::with_capacity(4);
        out.extend(self.transform.map(ComponentDelta::Transform));
        out.extend(self.velocity.map(ComponentDelta::Velocity));
        out.extend(self.health.map(ComponentDelta::Health));
        out.extend(self.visual.map(ComponentDelta::Visual));
        out
    }

    /// Components that differ from `old`.
    pub fn changed_since(&self, old: &EntityState) -> Vec<ComponentDelta> {
        let mut out = Vec::new();
        if self.transform != old.transform {
            out.extend(self.transform.map(ComponentDelta::Transform));
        }
        if self.velocity != old.velocity {
            out.extend(self.velocity.map(ComponentDelta::Velocity));
        }
        if self.health != old.health {
            out.extend(self.health.map(ComponentDelta::Health));
        }
        if self.visual != old.visual {
            out.extend(self.visual.map(ComponentDelta::Visual));
        }
        out
    }

    pub fn apply(&mut self, delta: &ComponentDelta) {
        match *delta {
            ComponentDelta::Transform(c) => self.transform = Some(c),
            ComponentDelta::Velocity(c) => self.velocity = Some(c),
            ComponentDelta::Health(c) => self.health = Some(c),
            ComponentDelta::Visual(c) => self.visual = Some(c),
        }
    }
}

/// Immutable replicated state of one interest set at one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct NetSnapshot {
    pub tick: Tick,
    pub entities: BTreeMap<EntityId, EntityState>,
}

impl NetSnapshot {
    /// Dead or unknown ids are skipped.
    pub fn capture(store: &ComponentStore, tick: Tick, ids: impl IntoIterator<Item = EntityId>) -> Self {
        let entities = ids
            .into_iter()
            .filter_map(|id| EntityState::capture(store, id).map(|s| (id, s)))
            .collect();
        Self { tick, entities }
    }

    /// Deltas that turn `baseline` into `self`, plus ids that left. With no
    /// baseline every entity is sent whole.
    pub fn diff(&self, baseline: Option<&NetSnapshot>) -> (Vec<EntityDelta>, Vec<EntityId>) {
        let mut deltas = Vec::new();
        for (id, state) in &self.entities {
            let old = baseline.and_then(|b| b.entities.get(id));
            match old {
                Some(old) if old.archetype == state.archetype => {
                    let components = state.changed_since(old);
                    if !components.is_empty() {
                        deltas.push(EntityDelta {
                            entity: *id,
                            archetype: None,
                            components,
                        });
                    }
                }
                _ => deltas.push(EntityDelta {
                    entity: *id,
                    archetype: Some(state.archetype),
                    components: state.components(),
                }),
            }
        }
        let removed = match baseline {
            Some(b) => b
                .entities
                .keys()
                .filter(|id| !self.entities.contains_key(id))
                .copied()
                .collect(),
            None => Vec::new(),
        };
        (deltas, removed)
    }
}

/// Bounded ring of the most recent snapshots, oldest first.
#[derive(Debug)]
pub struct SnapshotRing {
    capacity: usize,
    snapshots: VecDeque<NetSnapshot>,
}

impl SnapshotRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            snapshots: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Snapshots must arrive in increasing tick order; the oldest is evicted
    /// once the ring is full.
    pub fn push(&mut self, snapshot: NetSnapshot) {
        if self.snapshots.back().is_some_and(|last| last.tick >= snapshot.tick) {
            self.snapshots.retain(|s| s.tick < snapshot.tick);
        }
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn get(&self, tick: Tick) -> Option<&NetSnapshot> {
        self.snapshots
            .binary_search_by_key(&tick, |s| s.tick)
            .ok()
            .map(|i| &self.snapshots[i])
    }

    pub fn latest(&self) -> Option<&NetSnapshot> {
        self.snapshots.back()
    }

    pub fn oldest_tick(&self) -> Option<Tick> {
        self.snapshots.front().map(|s| s.tick)
    }

    /// Drops snapshots older than `tick`; they can no longer be a baseline.
    pub fn discard_before(&mut self, tick: Tick) {
        while self.snapshots.front().is_some_and(|s| s.tick < tick) {
            self.snapshots.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}
