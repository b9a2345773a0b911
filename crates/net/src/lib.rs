//! Network synchronisation between the authoritative simulation and its
//! clients.
//!
//! The server sends each connection the component state of the entities in
//! its interest set, as a delta against the last snapshot that connection
//! acknowledged. Clients predict their own entity from local input and
//! reconcile against the authoritative state when it arrives.
//!
//! # Invariants
//! - Deltas are only ever computed against acknowledged snapshots, so a lost
//!   packet is repaired by the next one.
//! - A client never applies a server message older than one it already
//!   applied; applying the same update twice leaves the same state as once.
//! - Each connection contributes at most one input frame per tick, in
//!   sequence order.

mod client;
mod config;
mod error;
mod input;
mod link;
mod server;
mod snapshot;
mod wire;

pub use client::{ClientEntity, ClientSync, Reconciled};
pub use config::{DisconnectPolicy, NetConfig};
pub use error::NetError;
pub use input::{InputSystem, PlayerInputs};
pub use link::{ClientLink, Link, ServerLink, link_pair};
pub use server::{Disconnected, ServerSync};
pub use snapshot::{EntityState, NetSnapshot, SnapshotRing};
pub use wire::{
    ClientMessage, ComponentDelta, EntityDelta, InputFrame, ServerMessage, UpdateMessage, decode, encode,
};

pub fn crate_info() -> &'static str {
    "emberfall-net v0.1.0"
}
