//! Read-only visual state handed to rendering and audio consumers.

use crate::component::{AnimationState, ComponentKind, ComponentMask, RenderLayer, Transform, Visual};
use crate::entity::EntityId;
use crate::store::ComponentStore;
use emberfall_common::{ArchetypeId, Tick};
use glam::Vec2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualEntity {
    pub entity: EntityId,
    pub archetype: ArchetypeId,
    pub position: Vec2,
    pub facing: Vec2,
    pub animation: AnimationState,
    pub layer: RenderLayer,
    /// Sort key within a layer; larger is drawn later (closer to the viewer).
    pub depth: f32,
}

/// Everything a renderer needs for one tick, already in draw order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualFrame {
    pub tick: Tick,
    pub entities: Vec<VisualEntity>,
}

impl VisualFrame {
    pub fn capture(store: &ComponentStore, tick: Tick) -> Self {
        let transforms = store.column::<Transform>();
        let visuals = store.column::<Visual>();
        let mask = ComponentMask::of(&[ComponentKind::Transform, ComponentKind::Visual]);
        let mut entities: Vec<VisualEntity> = store
            .query(mask)
            .filter_map(|id| {
                let t = transforms.get(id)?;
                let v = visuals.get(id)?;
                Some(VisualEntity {
                    entity: id,
                    archetype: store.archetype_of(id).ok()?,
                    position: t.position,
                    facing: t.facing,
                    animation: v.animation,
                    layer: v.layer,
                    depth: t.position.y,
                })
            })
            .collect();
        entities.sort_by(|a, b| {
            a.layer
                .cmp(&b.layer)
                .then(a.depth.total_cmp(&b.depth))
                .then(a.entity.index().cmp(&b.entity.index()))
        });
        Self { tick, entities }
    }

    pub fn get(&self, id: EntityId) -> Option<&VisualEntity> {
        self.entities.iter().find(|e| e.entity == id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
