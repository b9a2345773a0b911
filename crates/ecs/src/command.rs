//! Deferred structural changes recorded by systems.

use crate::archetype::ArchetypeKind;
use crate::component::{ComponentSnapshot, Health};
use crate::entity::EntityId;
use crate::store::ComponentStore;
use emberfall_common::{ArchetypeId, Tick};

#[derive(Debug, Clone)]
pub enum Command {
    Spawn {
        archetype: ArchetypeId,
        overrides: ComponentSnapshot,
    },
    Despawn(EntityId),
    Damage {
        target: EntityId,
        amount: f32,
        source: Option<EntityId>,
    },
}

/// Per-system command list. The scheduler merges buffers in declaration
/// order, so the applied sequence does not depend on thread timing.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

/// What applying a batch of commands changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Applied {
    pub spawned: Vec<EntityId>,
    pub despawned: Vec<EntityId>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn spawn(&mut self, archetype: ArchetypeId, overrides: ComponentSnapshot) {
        self.push(Command::Spawn { archetype, overrides });
    }

    pub fn despawn(&mut self, id: EntityId) {
        self.push(Command::Despawn(id));
    }

    pub fn damage(&mut self, target: EntityId, amount: f32, source: Option<EntityId>) {
        self.push(Command::Damage {
            target,
            amount,
            source,
        });
    }

    pub fn append(&mut self, other: &mut CommandBuffer) {
        self.commands.append(&mut other.commands);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// Applies every command in order. Commands aimed at entities that are
    /// already gone are skipped; a non-player reduced to zero health is
    /// despawned.
    pub fn apply(self, store: &mut ComponentStore, tick: Tick) -> Applied {
        let mut applied = Applied::default();
        for command in self.commands {
            match command {
                Command::Spawn {
                    archetype,
                    overrides,
                } => match store.spawn_with(archetype, overrides) {
                    Ok(id) => applied.spawned.push(id),
                    Err(e) => tracing::warn!(error = %e, "deferred spawn rejected"),
                },
                Command::Despawn(id) => {
                    if store.despawn(id).is_ok() {
                        applied.despawned.push(id);
                    } else {
                        tracing::debug!(%id, "despawn of dead entity skipped");
                    }
                }
                Command::Damage {
                    target,
                    amount,
                    source,
                } => {
                    let Ok(health) = store.get_mut::<Health>(target) else {
                        tracing::debug!(%target, "damage to entity without health skipped");
                        continue;
                    };
                    if health.is_dead() {
                        continue;
                    }
                    health.current = (health.current - amount).max(0.0);
                    health.last_hit = Some(tick);
                    let died = health.is_dead();
                    tracing::debug!(%target, ?source, amount, "damage applied");
                    if died && store.kind_of(target).is_ok_and(|k| k != ArchetypeKind::Player) {
                        if store.despawn(target).is_ok() {
                            applied.despawned.push(target);
                        }
                    }
                }
            }
        }
        applied
    }
}
