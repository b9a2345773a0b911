use emberfall_assets::AssetError;
use emberfall_ecs::EcsError;
use emberfall_net::NetError;
use emberfall_persist::StorageError;
use emberfall_stream::StreamError;
use std::path::PathBuf;
use thiserror::Error;

/// Conditions that stop the simulation. Everything recoverable is logged
/// and absorbed inside the tick instead.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error("chunk storage unavailable: {0}")]
    Storage(#[from] StorageError),
    #[error("component store corrupted: {0}")]
    Corruption(EcsError),
    #[error(transparent)]
    Ecs(EcsError),
    #[error(transparent)]
    Stream(StreamError),
    #[error(transparent)]
    Net(#[from] NetError),
}

impl From<EcsError> for SimError {
    fn from(e: EcsError) -> Self {
        if e.is_fatal() {
            SimError::Corruption(e)
        } else {
            SimError::Ecs(e)
        }
    }
}

impl From<StreamError> for SimError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Ecs(inner) => inner.into(),
            other => SimError::Stream(other),
        }
    }
}
