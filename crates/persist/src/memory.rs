use crate::record::{ChunkRecord, decode_record, encode_record};
use crate::store::{ChunkStore, StorageError};
use emberfall_common::ChunkCoord;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory chunk store. Records go through the same codec as the file
/// store. Failures and latency can be injected for streaming tests.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: Mutex<HashMap<ChunkCoord, Vec<u8>>>,
    /// Remaining forced load failures per chunk; `u32::MAX` fails forever.
    load_failures: Mutex<HashMap<ChunkCoord, u32>>,
    fail_saves: AtomicBool,
    latency: Mutex<Option<Duration>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_loads(&self, coord: ChunkCoord, times: u32) {
        self.load_failures.lock().insert(coord, times);
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Delay applied to every load and save.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.chunks.lock().contains_key(&coord)
    }

    fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(d) = latency {
            std::thread::sleep(d);
        }
    }
}

impl ChunkStore for MemoryChunkStore {
    fn load(&self, coord: ChunkCoord) -> Result<Option<ChunkRecord>, StorageError> {
        self.delay();
        self.loads.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.load_failures.lock();
            if let Some(remaining) = failures.get_mut(&coord) {
                if *remaining > 0 {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    return Err(StorageError::Unavailable(format!("injected load failure for {coord:?}")));
                }
            }
        }
        let data = self.chunks.lock().get(&coord).cloned();
        data.map(|bytes| decode_record(&bytes)).transpose()
    }

    fn save(&self, record: &ChunkRecord) -> Result<(), StorageError> {
        self.delay();
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected save failure".into()));
        }
        let bytes = encode_record(record)?;
        self.chunks.lock().insert(record.coord, bytes);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberfall_common::GeometryId;

    #[test]
    fn save_and_load() {
        let store = MemoryChunkStore::new();
        let coord = ChunkCoord::new(2, 3);
        assert!(store.load(coord).unwrap().is_none());
        store.save(&ChunkRecord::empty(coord, GeometryId(1))).unwrap();
        assert_eq!(store.load(coord).unwrap().map(|r| r.geometry), Some(GeometryId(1)));
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load_count(), 2);
    }

    #[test]
    fn injected_failures_run_out() {
        let store = MemoryChunkStore::new();
        let coord = ChunkCoord::new(0, 0);
        store.fail_loads(coord, 2);
        assert!(store.load(coord).is_err());
        assert!(store.load(coord).is_err());
        assert!(store.load(coord).is_ok());
    }

    #[test]
    fn failing_saves() {
        let store = MemoryChunkStore::new();
        store.fail_saves(true);
        assert!(store.save(&ChunkRecord::empty(ChunkCoord::new(0, 0), GeometryId(0))).is_err());
        store.fail_saves(false);
        assert!(store.save(&ChunkRecord::empty(ChunkCoord::new(0, 0), GeometryId(0))).is_ok());
    }
}
