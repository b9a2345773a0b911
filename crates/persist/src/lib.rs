//! Chunk persistence: the record format and the stores that hold it.
//!
//! # Invariants
//! - A chunk record is written whole; readers never see a partial file.
//! - Every stored file is SHA-256 verified against the manifest on load.
//! - A schema version mismatch fails closed when the store is opened.

mod memory;
mod record;
mod store;

pub use memory::MemoryChunkStore;
pub use record::{ChunkRecord, EntityRecord, decode_record, encode_record};
pub use store::{ChunkStore, FileChunkStore, IntegrityManifest, ManifestEntry, StorageError, StoreMeta};

pub fn crate_info() -> &'static str {
    "emberfall-persist v0.1.0"
}
