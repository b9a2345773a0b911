//! World streaming: which chunks are resident, and which entities belong to
//! which chunk.
//!
//! Chunks move through `Unloaded → Loading → Active → Unloading → Unloaded`,
//! or end in `Unavailable` after repeated load failures. Storage I/O runs on
//! named worker threads; results come back as [`StreamEvent`]s that the
//! simulation drains with [`WorldStreamer::pump`] at a fixed point in the
//! tick, so the simulation thread never waits on storage.
//!
//! # Invariants
//! - Entities of a chunk exist in the store only while it is `Active`.
//! - An entity is a member of exactly one chunk, the one containing its
//!   `Transform`; entities outside active chunks are suspended.
//! - Wanted chunks are never evicted; unwanted ones stay for `grace_ticks`.

mod config;
mod error;
mod io;
mod lod;
mod queue;
mod streamer;

pub use config::StreamConfig;
pub use error::StreamError;
pub use io::{IoPool, IoRequest, StreamEvent};
pub use lod::{LodCache, LodSummary};
pub use queue::LoadQueue;
pub use streamer::{ChunkState, StreamStats, WorldStreamer};

pub fn crate_info() -> &'static str {
    "emberfall-stream v0.1.0"
}
