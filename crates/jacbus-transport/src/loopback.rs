//! In-memory shared medium.
//!
//! `LoopbackBus` models the single wire: every tap hears every other tap's
//! transmissions, carrier sense is a shared last-activity timestamp, and
//! collisions can be injected deterministically for scheduler tests.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::Wire;

/// A simulated bus medium; create one per test or in-process topology and
/// [`tap`](LoopbackBus::tap) it once per node.
#[derive(Clone, Default)]
pub struct LoopbackBus {
    shared: Arc<Mutex<Medium>>,
}

#[derive(Default)]
struct Medium {
    taps: Vec<Tap>,
    last_activity: Option<Instant>,
    pending_collisions: u32,
    next_id: usize,
}

struct Tap {
    id: usize,
    tx: Sender<Bytes>,
}

impl LoopbackBus {
    /// Create an empty medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new node to the medium.
    pub fn tap(&self) -> LoopbackWire {
        let (tx, rx) = mpsc::channel();
        let mut medium = self.shared.lock().expect("medium lock");
        let id = medium.next_id;
        medium.next_id += 1;
        medium.taps.push(Tap { id, tx });
        LoopbackWire {
            id,
            shared: Arc::clone(&self.shared),
            rx,
        }
    }

    /// Make the next `n` transmissions fail with a collision.
    pub fn inject_collisions(&self, n: u32) {
        self.shared.lock().expect("medium lock").pending_collisions += n;
    }

    /// Mark the medium busy now, as if a foreign node were mid-transmission.
    pub fn mark_activity(&self) {
        self.shared.lock().expect("medium lock").last_activity = Some(Instant::now());
    }

    /// Number of attached taps.
    pub fn tap_count(&self) -> usize {
        self.shared.lock().expect("medium lock").taps.len()
    }
}

/// One node's connection to a [`LoopbackBus`].
pub struct LoopbackWire {
    id: usize,
    shared: Arc<Mutex<Medium>>,
    rx: Receiver<Bytes>,
}

impl Wire for LoopbackWire {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let mut medium = self.shared.lock().expect("medium lock");
        medium.last_activity = Some(Instant::now());

        if medium.pending_collisions > 0 {
            medium.pending_collisions -= 1;
            trace!(tap = self.id, "injected collision");
            return Err(TransportError::Collision);
        }

        let bytes = Bytes::copy_from_slice(frame);
        let own_id = self.id;
        medium
            .taps
            .retain(|tap| tap.id == own_id || tap.tx.send(bytes.clone()).is_ok());
        Ok(())
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        match self.rx.recv_timeout(timeout) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn idle_for(&self, gap: Duration) -> bool {
        let medium = self.shared.lock().expect("medium lock");
        match medium.last_activity {
            Some(at) => at.elapsed() >= gap,
            None => true,
        }
    }
}

impl Drop for LoopbackWire {
    fn drop(&mut self) {
        let mut medium = self.shared.lock().expect("medium lock");
        let own_id = self.id;
        medium.taps.retain(|tap| tap.id != own_id);
    }
}
