use emberfall_common::ConnectionId;
use emberfall_ecs::{EcsError, EntityId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode message: {0}")]
    Decode(String),
    /// The client's prediction drifted too far; a full resync was requested.
    #[error("prediction for {entity} diverged by {error} units")]
    NetworkDesync { entity: EntityId, error: f32 },
    #[error("unknown connection {0:?}")]
    UnknownConnection(ConnectionId),
    #[error(transparent)]
    Ecs(#[from] EcsError),
}
