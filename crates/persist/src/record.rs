use crate::store::StorageError;
use emberfall_common::{ArchetypeId, ChunkCoord, GeometryId, Tick};
use emberfall_ecs::ComponentSnapshot;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// One persisted entity: its archetype and full component state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub archetype: ArchetypeId,
    pub components: ComponentSnapshot,
}

/// Everything needed to bring a chunk back: its geometry reference and the
/// non-player entities that lived in it when it was unloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub coord: ChunkCoord,
    pub geometry: GeometryId,
    pub saved_tick: Tick,
    pub entities: Vec<EntityRecord>,
}

impl ChunkRecord {
    pub fn empty(coord: ChunkCoord, geometry: GeometryId) -> Self {
        Self {
            coord,
            geometry,
            saved_tick: 0,
            entities: Vec::new(),
        }
    }
}

/// CBOR, then zstd.
pub fn encode_record(record: &ChunkRecord) -> Result<Vec<u8>, StorageError> {
    let mut cbor = Vec::new();
    ciborium::into_writer(record, &mut cbor).map_err(|e| StorageError::CborEncode(e.to_string()))?;
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(&cbor)?;
    Ok(encoder.finish()?)
}

pub fn decode_record(data: &[u8]) -> Result<ChunkRecord, StorageError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut cbor = Vec::new();
    decoder.read_to_end(&mut cbor)?;
    ciborium::from_reader(cbor.as_slice()).map_err(|e| StorageError::CborDecode(e.to_string()))
}
