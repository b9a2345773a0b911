//! Storage I/O off the simulation thread.
//!
//! Each worker owns a bounded request queue; requests for one chunk always
//! go to the same worker, so a save and a later load of that chunk are
//! served in submission order.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use emberfall_common::{ChunkCoord, Fnv1a};
use emberfall_persist::{ChunkRecord, ChunkStore};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug)]
pub enum IoRequest {
    Load {
        coord: ChunkCoord,
        ticket: u64,
        cancel: Arc<AtomicBool>,
    },
    Save {
        record: ChunkRecord,
        ticket: u64,
    },
}

impl IoRequest {
    pub fn coord(&self) -> ChunkCoord {
        match self {
            IoRequest::Load { coord, .. } => *coord,
            IoRequest::Save { record, .. } => record.coord,
        }
    }
}

#[derive(Debug)]
pub enum StreamEvent {
    /// `record` is `None` when the chunk has never been saved.
    ChunkReady {
        coord: ChunkCoord,
        ticket: u64,
        record: Option<ChunkRecord>,
    },
    ChunkLoadFailed {
        coord: ChunkCoord,
        ticket: u64,
        reason: String,
    },
    ChunkEvicted {
        coord: ChunkCoord,
        ticket: u64,
    },
    ChunkSaveFailed {
        coord: ChunkCoord,
        ticket: u64,
        reason: String,
    },
}

fn serve(store: &dyn ChunkStore, request: IoRequest) -> Option<StreamEvent> {
    match request {
        IoRequest::Load { coord, ticket, cancel } => {
            if cancel.load(Ordering::Acquire) {
                return None;
            }
            let result = store.load(coord);
            // Late results of cancelled requests are dropped here; the
            // streamer also discards them by ticket.
            if cancel.load(Ordering::Acquire) {
                return None;
            }
            Some(match result {
                Ok(record) => StreamEvent::ChunkReady { coord, ticket, record },
                Err(e) => StreamEvent::ChunkLoadFailed {
                    coord,
                    ticket,
                    reason: e.to_string(),
                },
            })
        }
        IoRequest::Save { record, ticket } => {
            let coord = record.coord;
            Some(match store.save(&record) {
                Ok(()) => StreamEvent::ChunkEvicted { coord, ticket },
                Err(e) => StreamEvent::ChunkSaveFailed {
                    coord,
                    ticket,
                    reason: e.to_string(),
                },
            })
        }
    }
}

struct Worker {
    requests: Sender<IoRequest>,
    handle: JoinHandle<()>,
}

/// Fixed pool of storage workers, or inline execution when created with zero
/// workers.
pub struct IoPool {
    store: Arc<dyn ChunkStore>,
    workers: Vec<Worker>,
    events_tx: Sender<StreamEvent>,
    events_rx: Receiver<StreamEvent>,
    inline: VecDeque<StreamEvent>,
}

impl IoPool {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        workers: usize,
        request_capacity: usize,
        event_capacity: usize,
    ) -> std::io::Result<Self> {
        let (events_tx, events_rx) = bounded(event_capacity);
        let mut pool = Self {
            store,
            workers: Vec::with_capacity(workers),
            events_tx,
            events_rx,
            inline: VecDeque::new(),
        };
        for n in 0..workers {
            let (tx, rx) = bounded::<IoRequest>(request_capacity);
            let store = Arc::clone(&pool.store);
            let events = pool.events_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("chunk-io-{n}"))
                .spawn(move || {
                    while let Ok(request) = rx.recv() {
                        let Some(event) = serve(store.as_ref(), request) else {
                            continue;
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    tracing::trace!("chunk io worker exiting");
                })?;
            pool.workers.push(Worker { requests: tx, handle });
        }
        Ok(pool)
    }

    pub fn is_inline(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn worker_for(&self, coord: ChunkCoord) -> usize {
        let mut h = Fnv1a::new();
        h.write_u32(coord.x as u32);
        h.write_u32(coord.y as u32);
        (h.finish() % self.workers.len() as u64) as usize
    }

    /// Queues a request without blocking. A full queue hands the request
    /// back so the caller can retry on a later tick.
    pub fn submit(&mut self, request: IoRequest) -> Result<(), IoRequest> {
        if self.workers.is_empty() {
            if let Some(event) = serve(self.store.as_ref(), request) {
                self.inline.push_back(event);
            }
            return Ok(());
        }
        let worker = &self.workers[self.worker_for(request.coord())];
        worker.requests.try_send(request).map_err(|e| match e {
            TrySendError::Full(r) | TrySendError::Disconnected(r) => r,
        })
    }

    /// Every event available right now.
    pub fn drain(&mut self) -> Vec<StreamEvent> {
        let mut out: Vec<StreamEvent> = self.inline.drain(..).collect();
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Waits up to `timeout` for at least one event.
    pub fn wait(&mut self, timeout: Duration) -> Option<StreamEvent> {
        if let Some(event) = self.inline.pop_front() {
            return Some(event);
        }
        if self.workers.is_empty() {
            return None;
        }
        self.events_rx.recv_timeout(timeout).ok()
    }
}

impl Drop for IoPool {
    fn drop(&mut self) {
        let workers = std::mem::take(&mut self.workers);
        // Closing the request queues lets workers finish pending saves and exit.
        let handles: Vec<JoinHandle<()>> = workers
            .into_iter()
            .map(|w| {
                drop(w.requests);
                w.handle
            })
            .collect();
        // Keep draining so a worker blocked on a full event queue can finish.
        for handle in handles {
            while !handle.is_finished() {
                let _ = self.events_rx.recv_timeout(Duration::from_millis(5));
            }
            if handle.join().is_err() {
                tracing::error!("chunk io worker panicked");
            }
        }
    }
}
