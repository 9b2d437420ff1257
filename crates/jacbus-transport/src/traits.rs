use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// A connection to the shared bus medium.
///
/// The bus layer is transport-agnostic: anything that can move whole frame
/// datagrams, sense carrier, and report collisions can carry it. Collision
/// *detection* is a property of the physical medium, so it lives behind this
/// trait — [`send`](Wire::send) returns `TransportError::Collision` when the
/// medium saw a conflict, and the caller is expected to back off and retry.
pub trait Wire: Send {
    /// Transmit one frame datagram.
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Receive the next frame datagram, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout elapses with no traffic.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>>;

    /// Carrier sense: true when the medium has been quiet for at least `gap`.
    fn idle_for(&self, gap: Duration) -> bool;
}
