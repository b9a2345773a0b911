//! In-process transport: a pair of bounded byte queues carrying CBOR
//! messages.

use crate::error::NetError;
use crate::wire::{ClientMessage, ServerMessage, decode, encode};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tracing::warn;

/// One end of a link. Sends `Out`, receives `In`.
#[derive(Debug)]
pub struct Link<Out, In> {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    dropped: u64,
    open: bool,
    _marker: PhantomData<fn(Out) -> In>,
}

pub type ServerLink = Link<ServerMessage, ClientMessage>;
pub type ClientLink = Link<ClientMessage, ServerMessage>;

/// Connected server and client ends, each direction holding at most
/// `capacity` packets.
pub fn link_pair(capacity: usize) -> (ServerLink, ClientLink) {
    let (to_client, from_server) = bounded(capacity);
    let (to_server, from_client) = bounded(capacity);
    (Link::new(to_client, from_client), Link::new(to_server, from_server))
}

impl<Out: Serialize, In: DeserializeOwned> Link<Out, In> {
    fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        Self {
            tx,
            rx,
            dropped: 0,
            open: true,
            _marker: PhantomData,
        }
    }

    /// Queues a message without blocking. Returns `Ok(false)` when the
    /// packet was dropped because the queue is full or the peer is gone.
    pub fn send(&mut self, message: &Out) -> Result<bool, NetError> {
        let bytes = encode(message)?;
        match self.tx.try_send(bytes) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!(dropped = self.dropped, "link queue full, packet dropped");
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.open = false;
                Ok(false)
            }
        }
    }

    /// Every message received so far. Undecodable packets are logged and
    /// skipped.
    pub fn poll(&mut self) -> Vec<In> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(bytes) => match decode::<In>(&bytes) {
                    Ok(message) => out.push(message),
                    Err(e) => warn!(error = %e, "undecodable packet skipped"),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.open = false;
                    break;
                }
            }
        }
        out
    }

    /// False once the peer end has been dropped.
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
