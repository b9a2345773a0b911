use crate::component::ComponentKind;
use crate::entity::EntityId;
use emberfall_common::ArchetypeId;

/// Errors from the component store and the system contract.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("entity {entity} has no {kind:?} component")]
    ComponentMissing {
        entity: EntityId,
        kind: ComponentKind,
    },
    #[error("unknown archetype {0:?}")]
    UnknownArchetype(ArchetypeId),
    #[error("malformed archetype '{name}': {reason}")]
    MalformedArchetype { name: String, reason: String },
    #[error("{kind:?} is not part of archetype '{archetype}'")]
    UnexpectedComponent {
        archetype: String,
        kind: ComponentKind,
    },
    #[error("system '{system}' touched {kind:?} without declaring {mode} access")]
    UndeclaredAccess {
        system: String,
        kind: ComponentKind,
        mode: &'static str,
    },
    #[error("component store corrupted: {0}")]
    Corruption(String),
}

impl EcsError {
    /// Whether the error leaves the store in an unusable state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EcsError::Corruption(_))
    }
}
