use crate::wire::InputFrame;
use emberfall_ecs::*;
use std::collections::BTreeMap;

/// Input frames to apply this tick, keyed by the player entity. Inserted as
/// a resource before the scheduler runs.
#[derive(Debug, Clone, Default)]
pub struct PlayerInputs {
    frames: BTreeMap<EntityId, InputFrame>,
}

impl PlayerInputs {
    pub fn insert(&mut self, entity: EntityId, frame: InputFrame) {
        self.frames.insert(entity, frame);
    }

    pub fn get(&self, entity: EntityId) -> Option<&InputFrame> {
        self.frames.get(&entity)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Turns each player's input frame into its `Intent`. A player without a
/// frame this tick stands still.
#[derive(Debug, Default)]
pub struct InputSystem;

impl System for InputSystem {
    fn name(&self) -> &str {
        "input"
    }

    fn access(&self) -> Access {
        Access::new().read(ComponentKind::NetworkId).write(ComponentKind::Intent)
    }

    fn run(&mut self, ctx: &SystemContext<'_>, _commands: &mut CommandBuffer) -> Result<(), SystemError> {
        let inputs = ctx
            .resource::<PlayerInputs>()
            .ok_or(SystemError::MissingResource("PlayerInputs"))?;
        let mut intents = ctx.write::<Intent>()?;
        let players: Vec<EntityId> = ctx
            .query(ComponentMask::of(&[ComponentKind::NetworkId, ComponentKind::Intent]))?
            .collect();
        for id in players {
            let Some(intent) = intents.get_mut(id) else {
                continue;
            };
            *intent = inputs.get(id).map_or_else(Intent::idle, InputFrame::intent);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberfall_common::ArchetypeId;
    use glam::Vec2;

    #[test]
    fn frames_drive_intents_and_missing_frames_idle() {
        let mut s = ComponentStore::new();
        s.register_archetype(ArchetypeTemplate {
            id: ArchetypeId(0),
            name: "hero".into(),
            kind: ArchetypeKind::Player,
            defaults: ComponentSnapshot {
                transform: Some(Transform::default()),
                health: Some(Health::default()),
                intent: Some(Intent::walk(Vec2::Y, 1.0)),
                network_id: Some(NetworkId::default()),
                body: Some(Body::default()),
                ..Default::default()
            },
        })
        .unwrap();
        let a = s.spawn(ArchetypeId(0)).unwrap();
        let b = s.spawn(ArchetypeId(0)).unwrap();
        let mut inputs = PlayerInputs::default();
        inputs.insert(
            a,
            InputFrame {
                seq: 1,
                movement: Vec2::new(-1.0, 0.0),
                attack: true,
            },
        );
        let mut r = Resources::new();
        r.insert(inputs);

        let mut sys = InputSystem;
        let ctx = SystemContext::new(&s, &r, sys.access(), "input", 1, 0.05);
        let mut cmds = CommandBuffer::new();
        sys.run(&ctx, &mut cmds).unwrap();
        drop(ctx);

        let ia = *s.get::<Intent>(a).unwrap();
        assert_eq!(ia.movement, Vec2::new(-1.0, 0.0));
        assert!(ia.attack);
        assert_eq!(*s.get::<Intent>(b).unwrap(), Intent::idle());
    }
}
