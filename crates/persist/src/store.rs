//! File-backed chunk storage.
//!
//! Layout inside the store directory:
//! ```text
//! store.meta.json              - schema version and catalog fingerprint
//! chunks/
//!   x_y.chunk.cbor.zst         - CBOR+zstd compressed chunk records
//! integrity/
//!   manifest.json              - SHA-256 of every chunk file
//! ```

use crate::record::{ChunkRecord, decode_record, encode_record};
use emberfall_common::{ChunkCoord, Tick};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const CHUNK_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable chunk storage. Called from I/O worker threads, never from the
/// simulation thread.
pub trait ChunkStore: Send + Sync {
    /// `Ok(None)` means the chunk was never saved.
    fn load(&self, coord: ChunkCoord) -> Result<Option<ChunkRecord>, StorageError>;

    fn save(&self, record: &ChunkRecord) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub chunk_schema_version: u32,
    /// Fingerprint of the asset catalog the chunks were written against.
    #[serde(default)]
    pub catalog_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub sha256: String,
    pub saved_tick: Tick,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: BTreeMap<String, ManifestEntry>,
}

pub struct FileChunkStore {
    root: PathBuf,
    meta: StoreMeta,
    manifest: Mutex<IntegrityManifest>,
}

impl FileChunkStore {
    /// Opens or creates a store. An unreadable meta file or a schema
    /// mismatch is an error; the caller treats it as fatal.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("chunks"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("store.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.chunk_schema_version != CHUNK_SCHEMA_VERSION {
                return Err(StorageError::SchemaMismatch {
                    file_version: meta.chunk_schema_version,
                    expected_version: CHUNK_SCHEMA_VERSION,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = StoreMeta {
                chunk_schema_version: CHUNK_SCHEMA_VERSION,
                catalog_fingerprint: None,
            };
            let manifest = IntegrityManifest::default();
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            serde_json::to_writer_pretty(std::fs::File::create(&manifest_path)?, &manifest)?;
            (meta, manifest)
        };

        tracing::info!(root = %root.display(), chunks = manifest.entries.len(), "chunk store opened");
        Ok(Self {
            root,
            meta,
            manifest: Mutex::new(manifest),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    /// Records the catalog fingerprint; warns when it differs from the one
    /// the store was last written with.
    pub fn bind_catalog(&mut self, fingerprint: &str) -> Result<(), StorageError> {
        if let Some(old) = &self.meta.catalog_fingerprint {
            if old != fingerprint {
                tracing::warn!(%old, new = %fingerprint, "chunk store was written with a different catalog");
            }
        }
        self.meta.catalog_fingerprint = Some(fingerprint.to_string());
        serde_json::to_writer_pretty(
            std::fs::File::create(self.root.join("store.meta.json"))?,
            &self.meta,
        )?;
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.manifest.lock().entries.len()
    }

    fn filename(coord: ChunkCoord) -> String {
        format!("{}_{}.chunk.cbor.zst", coord.x, coord.y)
    }

    /// Verifies every chunk file listed in the manifest.
    pub fn verify_integrity(&self) -> Result<(), StorageError> {
        let manifest = self.manifest.lock().clone();
        for (filename, entry) in &manifest.entries {
            let data = std::fs::read(self.root.join("chunks").join(filename))?;
            let actual = sha256_hex(&data);
            if actual != entry.sha256 {
                return Err(StorageError::IntegrityMismatch {
                    expected: entry.sha256.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    fn save_manifest(&self, manifest: &IntegrityManifest) -> Result<(), StorageError> {
        let path = self.root.join("integrity").join("manifest.json");
        let tmp = path.with_extension("json.tmp");
        serde_json::to_writer_pretty(std::fs::File::create(&tmp)?, manifest)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }
}

impl ChunkStore for FileChunkStore {
    fn load(&self, coord: ChunkCoord) -> Result<Option<ChunkRecord>, StorageError> {
        let filename = Self::filename(coord);
        let expected = match self.manifest.lock().entries.get(&filename) {
            Some(entry) => entry.sha256.clone(),
            None => return Ok(None),
        };
        let data = std::fs::read(self.root.join("chunks").join(&filename))?;
        let actual = sha256_hex(&data);
        if actual != expected {
            return Err(StorageError::IntegrityMismatch { expected, actual });
        }
        let record = decode_record(&data)?;
        if record.coord != coord {
            return Err(StorageError::IntegrityMismatch {
                expected: format!("{coord:?}"),
                actual: format!("{:?}", record.coord),
            });
        }
        tracing::debug!(?coord, entities = record.entities.len(), "chunk record loaded");
        Ok(Some(record))
    }

    fn save(&self, record: &ChunkRecord) -> Result<(), StorageError> {
        let filename = Self::filename(record.coord);
        let data = encode_record(record)?;
        let path = self.root.join("chunks").join(&filename);
        let tmp = path.with_extension("zst.tmp");
        std::fs::write(&tmp, &data)?;
        std::fs::rename(&tmp, &path)?;

        let mut manifest = self.manifest.lock();
        manifest.entries.insert(
            filename,
            ManifestEntry {
                sha256: sha256_hex(&data),
                saved_tick: record.saved_tick,
            },
        );
        self.save_manifest(&manifest)?;
        tracing::debug!(coord = ?record.coord, bytes = data.len(), "chunk record saved");
        Ok(())
    }
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
