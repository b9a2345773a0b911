use emberfall_common::ChunkCoord;
use emberfall_ecs::EcsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("chunk {coord:?} failed to load after {attempts} attempts: {reason}")]
    ChunkLoadFailure {
        coord: ChunkCoord,
        attempts: u32,
        reason: String,
    },
    #[error("unknown geometry {0:?} referenced by a chunk")]
    UnknownGeometry(emberfall_common::GeometryId),
    #[error("failed to start storage worker: {0}")]
    Worker(#[from] std::io::Error),
    #[error(transparent)]
    Ecs(#[from] EcsError),
}
