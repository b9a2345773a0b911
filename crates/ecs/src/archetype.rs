use crate::component::{ComponentKind, ComponentMask, ComponentSnapshot};
use crate::error::EcsError;
use emberfall_common::ArchetypeId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchetypeKind {
    Player,
    Npc,
    Projectile,
    Prop,
}

/// A named component set with default values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchetypeTemplate {
    pub id: ArchetypeId,
    pub name: String,
    pub kind: ArchetypeKind,
    pub defaults: ComponentSnapshot,
}

impl ArchetypeTemplate {
    pub fn mask(&self) -> ComponentMask {
        self.defaults.mask()
    }

    pub fn validate(&self) -> Result<(), EcsError> {
        use ComponentKind as K;
        let bad = |reason: String| EcsError::MalformedArchetype {
            name: self.name.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(bad("empty name".into()));
        }
        let mask = self.mask();
        let (required, forbidden): (&[K], &[K]) = match self.kind {
            ArchetypeKind::Player => (
                &[K::Transform, K::NetworkId, K::Intent, K::Body],
                &[K::Brain, K::Projectile],
            ),
            ArchetypeKind::Npc => (
                &[K::Transform, K::Brain, K::Intent, K::Body, K::Health],
                &[K::NetworkId, K::Projectile],
            ),
            ArchetypeKind::Projectile => (
                &[K::Transform, K::Velocity, K::Body, K::Projectile],
                &[K::Brain, K::NetworkId, K::Intent],
            ),
            ArchetypeKind::Prop => (&[K::Transform], &[K::Brain, K::NetworkId, K::Intent]),
        };
        if let Some(k) = required.iter().find(|k| !mask.contains(**k)) {
            return Err(bad(format!("{:?} archetype requires {k:?}", self.kind)));
        }
        if let Some(k) = forbidden.iter().find(|k| mask.contains(**k)) {
            return Err(bad(format!("{:?} archetype must not carry {k:?}", self.kind)));
        }
        if let Some(h) = &self.defaults.health {
            if !(h.max > 0.0 && h.current > 0.0 && h.current <= h.max) {
                return Err(bad(format!("health {}/{} out of range", h.current, h.max)));
            }
        }
        if let Some(b) = &self.defaults.body {
            if !(b.radius.is_finite() && b.radius > 0.0 && b.speed.is_finite() && b.speed >= 0.0) {
                return Err(bad("body radius and speed must be finite and positive".into()));
            }
        }
        if let Some(c) = &self.defaults.combat {
            if !(c.reach > 0.0 && c.damage >= 0.0) {
                return Err(bad("combat reach must be positive".into()));
            }
        }
        Ok(())
    }
}
