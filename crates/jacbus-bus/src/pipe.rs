//! Streaming pipes multiplexed over regular packets.
//!
//! Pipe traffic occupies the `0x3000` command page:
//! `0x3000 | port << 5 | counter`, with a 7-bit port and a wrapping 5-bit
//! chunk counter. A zero-length chunk closes the port. Exactly one pipe owns
//! a port at a time, buffers are bounded, and a full buffer rejects the write
//! (`PipeFull`) rather than dropping data.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use jacbus_frame::CMD_PIPE_PAGE;

use crate::error::{BusError, Result};

/// Ports are 7 bits; 0 is reserved (never assigned).
pub const MAX_PORT: u8 = 0x7f;

const PORT_SHIFT: u16 = 5;
const COUNTER_MASK: u16 = 0x1f;

/// Build a pipe data command for `port` with a wrapping chunk counter.
pub fn pipe_command(port: u8, counter: u8) -> u16 {
    CMD_PIPE_PAGE | ((port as u16 & MAX_PORT as u16) << PORT_SHIFT) | (counter as u16 & COUNTER_MASK)
}

/// Extract the port from a pipe command.
pub fn pipe_port(command: u16) -> u8 {
    ((command >> PORT_SHIFT) & MAX_PORT as u16) as u8
}

/// Extract the chunk counter from a pipe command.
pub fn pipe_counter(command: u16) -> u8 {
    (command & COUNTER_MASK) as u8
}

/// Which way bytes flow on a pipe, from this node's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeDirection {
    /// We write; the peer reads.
    Command,
    /// The peer writes; we read.
    Report,
}

/// Pipe lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    Open,
    /// Close requested locally; a zero-length chunk goes out after the
    /// buffered data drains.
    Closing,
    Closed,
}

/// One open streaming sub-channel.
#[derive(Debug)]
pub struct Pipe {
    pub port: u8,
    /// Device on the other end.
    pub peer: u64,
    /// Service index the pipe's packets are addressed to.
    pub service_index: u8,
    pub direction: PipeDirection,
    pub state: PipeState,
    inbound: VecDeque<Bytes>,
    outbound: VecDeque<Bytes>,
    next_counter: u8,
    expected_counter: u8,
    /// Total bytes moved through this pipe.
    pub bytes_transferred: u64,
    last_activity: Instant,
}

impl Pipe {
    /// Chunks waiting to be read.
    pub fn buffered(&self) -> usize {
        self.inbound.len()
    }

    /// Chunks waiting to be transmitted.
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }
}

/// A chunk ready to leave on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundChunk {
    pub peer: u64,
    pub service_index: u8,
    pub command: u16,
    pub payload: Bytes,
}

/// Result of polling a pipe for readable data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One chunk, in send order.
    Chunk(Bytes),
    /// Nothing buffered, pipe still open.
    Empty,
    /// Closed and drained; no more data will ever arrive.
    Closed,
}

/// What [`PipeManager::feed`] did with an inbound chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Accepted,
    /// Buffer full; the chunk was not accepted.
    Overflow,
    /// The chunk closed the pipe (zero-length), or the port is unknown.
    Ignored,
}

/// The open-pipe table; owned exclusively by the bus daemon.
#[derive(Debug)]
pub struct PipeManager {
    pipes: HashMap<u8, Pipe>,
    capacity: usize,
    idle_timeout: Duration,
}

impl PipeManager {
    pub fn new(capacity: usize, idle_timeout: Duration) -> Self {
        Self {
            pipes: HashMap::new(),
            capacity,
            idle_timeout,
        }
    }

    /// Open a pipe to `peer`, returning the assigned port.
    pub fn open(
        &mut self,
        peer: u64,
        service_index: u8,
        direction: PipeDirection,
        now: Instant,
    ) -> Result<u8> {
        let port = (1..=MAX_PORT)
            .find(|port| !self.pipes.contains_key(port))
            .ok_or(BusError::NoFreePort)?;

        debug!(port, peer = %format_args!("{peer:#018x}"), ?direction, "pipe open");
        self.pipes.insert(
            port,
            Pipe {
                port,
                peer,
                service_index,
                direction,
                state: PipeState::Open,
                inbound: VecDeque::new(),
                outbound: VecDeque::new(),
                next_counter: 0,
                expected_counter: 0,
                bytes_transferred: 0,
                last_activity: now,
            },
        );
        Ok(port)
    }

    /// Bind a specific port, for the producer side of a pipe whose consumer
    /// allocated the port and communicated it out of band.
    pub fn bind(
        &mut self,
        port: u8,
        peer: u64,
        service_index: u8,
        direction: PipeDirection,
        now: Instant,
    ) -> Result<()> {
        if port == 0 || port > MAX_PORT || self.pipes.contains_key(&port) {
            return Err(BusError::NoFreePort);
        }
        debug!(port, peer = %format_args!("{peer:#018x}"), ?direction, "pipe bind");
        self.pipes.insert(
            port,
            Pipe {
                port,
                peer,
                service_index,
                direction,
                state: PipeState::Open,
                inbound: VecDeque::new(),
                outbound: VecDeque::new(),
                next_counter: 0,
                expected_counter: 0,
                bytes_transferred: 0,
                last_activity: now,
            },
        );
        Ok(())
    }

    /// Queue bytes for transmission on a command pipe.
    ///
    /// Rejects with `PipeFull` once `capacity` chunks are queued; accepted
    /// data is never dropped or reordered.
    pub fn write(&mut self, port: u8, bytes: Bytes, now: Instant) -> Result<()> {
        let pipe = self
            .pipes
            .get_mut(&port)
            .ok_or(BusError::PipeClosed { port })?;
        if pipe.state != PipeState::Open {
            return Err(BusError::PipeClosed { port });
        }
        if pipe.outbound.len() >= self.capacity {
            return Err(BusError::PipeFull { port });
        }
        pipe.outbound.push_back(bytes);
        pipe.last_activity = now;
        Ok(())
    }

    /// Pop the next readable chunk, in send order.
    pub fn read(&mut self, port: u8) -> ReadOutcome {
        let Some(pipe) = self.pipes.get_mut(&port) else {
            return ReadOutcome::Closed;
        };
        match pipe.inbound.pop_front() {
            Some(chunk) => ReadOutcome::Chunk(chunk),
            None if pipe.state == PipeState::Closed => {
                self.pipes.remove(&port);
                ReadOutcome::Closed
            }
            None => ReadOutcome::Empty,
        }
    }

    /// Accept a chunk that arrived from the peer.
    pub fn feed(&mut self, port: u8, counter: u8, payload: Bytes, now: Instant) -> FeedOutcome {
        let Some(pipe) = self.pipes.get_mut(&port) else {
            return FeedOutcome::Ignored;
        };
        pipe.last_activity = now;

        if payload.is_empty() {
            debug!(port, "pipe closed by peer");
            pipe.state = PipeState::Closed;
            return FeedOutcome::Ignored;
        }
        if pipe.state == PipeState::Closed {
            return FeedOutcome::Ignored;
        }

        if counter != pipe.expected_counter {
            // Lossy bus: resynchronize on the sender's counter.
            warn!(
                port,
                expected = pipe.expected_counter,
                got = counter,
                "pipe counter skip"
            );
        }
        pipe.expected_counter = (counter + 1) & COUNTER_MASK as u8;

        if pipe.inbound.len() >= self.capacity {
            return FeedOutcome::Overflow;
        }
        pipe.bytes_transferred += payload.len() as u64;
        pipe.inbound.push_back(payload);
        FeedOutcome::Accepted
    }

    /// Request a local close; the close chunk goes out after queued data.
    pub fn close(&mut self, port: u8) -> Result<()> {
        match self.pipes.get_mut(&port) {
            Some(pipe) if pipe.state == PipeState::Open => {
                pipe.state = PipeState::Closing;
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(BusError::PipeClosed { port }),
        }
    }

    /// Drain chunks ready for the wire: queued data first, then close
    /// markers for `Closing` pipes.
    pub fn flush(&mut self, now: Instant) -> Vec<OutboundChunk> {
        let mut out = Vec::new();
        let mut finished = Vec::new();

        for pipe in self.pipes.values_mut() {
            while let Some(chunk) = pipe.outbound.pop_front() {
                pipe.bytes_transferred += chunk.len() as u64;
                pipe.last_activity = now;
                let command = pipe_command(pipe.port, pipe.next_counter);
                pipe.next_counter = (pipe.next_counter + 1) & COUNTER_MASK as u8;
                out.push(OutboundChunk {
                    peer: pipe.peer,
                    service_index: pipe.service_index,
                    command,
                    payload: chunk,
                });
            }
            if pipe.state == PipeState::Closing {
                out.push(OutboundChunk {
                    peer: pipe.peer,
                    service_index: pipe.service_index,
                    command: pipe_command(pipe.port, pipe.next_counter),
                    payload: Bytes::new(),
                });
                pipe.state = PipeState::Closed;
                if pipe.inbound.is_empty() {
                    finished.push(pipe.port);
                }
            }
        }

        for port in finished {
            self.pipes.remove(&port);
        }
        out
    }

    /// Tear down pipes idle past the timeout; returns the affected ports.
    pub fn sweep(&mut self, now: Instant) -> Vec<u8> {
        let idle: Vec<u8> = self
            .pipes
            .values()
            .filter(|pipe| now.duration_since(pipe.last_activity) > self.idle_timeout)
            .map(|pipe| pipe.port)
            .collect();
        for port in &idle {
            debug!(port, "pipe idle timeout");
            self.pipes.remove(port);
        }
        idle
    }

    /// Drop every pipe owned by a device's services (restart or eviction).
    pub fn drop_for_peer(&mut self, peer: u64) -> usize {
        let before = self.pipes.len();
        self.pipes.retain(|_, pipe| pipe.peer != peer);
        before - self.pipes.len()
    }

    pub fn pipe(&self, port: u8) -> Option<&Pipe> {
        self.pipes.get(&port)
    }

    pub fn open_count(&self) -> usize {
        self.pipes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: u64 = 0xaaaa_bbbb_cccc_dddd;

    fn manager() -> PipeManager {
        PipeManager::new(4, Duration::from_secs(30))
    }

    #[test]
    fn command_bits_roundtrip() {
        let cmd = pipe_command(0x5a, 0x13);
        assert_eq!(cmd & 0xf000, CMD_PIPE_PAGE);
        assert_eq!(pipe_port(cmd), 0x5a);
        assert_eq!(pipe_counter(cmd), 0x13);
    }

    #[test]
    fn ports_are_exclusive_and_reused_after_close() {
        let mut pipes = manager();
        let now = Instant::now();
        let a = pipes.open(PEER, 1, PipeDirection::Command, now).unwrap();
        let b = pipes.open(PEER, 1, PipeDirection::Command, now).unwrap();
        assert_ne!(a, b);

        pipes.close(a).unwrap();
        pipes.flush(now);
        let c = pipes.open(PEER, 1, PipeDirection::Command, now).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn write_is_bounded_and_never_drops() {
        let mut pipes = manager();
        let now = Instant::now();
        let port = pipes.open(PEER, 1, PipeDirection::Command, now).unwrap();

        for i in 0..4u8 {
            pipes.write(port, Bytes::from(vec![i]), now).unwrap();
        }
        let err = pipes.write(port, Bytes::from_static(b"x"), now).unwrap_err();
        assert!(matches!(err, BusError::PipeFull { .. }));

        // Everything accepted so far leaves in order.
        let chunks = pipes.flush(now);
        let data: Vec<u8> = chunks.iter().map(|c| c.payload[0]).collect();
        assert_eq!(data, vec![0, 1, 2, 3]);

        // Draining frees capacity again.
        pipes.write(port, Bytes::from_static(b"x"), now).unwrap();
    }

    #[test]
    fn flush_assigns_wrapping_counters() {
        let mut pipes = manager();
        let now = Instant::now();
        let port = pipes.open(PEER, 2, PipeDirection::Command, now).unwrap();

        let mut counters = Vec::new();
        for round in 0..17u8 {
            pipes.write(port, Bytes::from(vec![round]), now).unwrap();
            pipes.write(port, Bytes::from(vec![round]), now).unwrap();
            for chunk in pipes.flush(now) {
                counters.push(pipe_counter(chunk.command));
            }
        }
        assert_eq!(counters.len(), 34);
        assert_eq!(counters[0], 0);
        assert_eq!(counters[31], 31);
        assert_eq!(counters[32], 0, "counter wraps at 5 bits");
    }

    #[test]
    fn feed_and_read_in_order() {
        let mut pipes = manager();
        let now = Instant::now();
        let port = pipes.open(PEER, 1, PipeDirection::Report, now).unwrap();

        assert_eq!(
            pipes.feed(port, 0, Bytes::from_static(b"first"), now),
            FeedOutcome::Accepted
        );
        assert_eq!(
            pipes.feed(port, 1, Bytes::from_static(b"second"), now),
            FeedOutcome::Accepted
        );

        assert_eq!(
            pipes.read(port),
            ReadOutcome::Chunk(Bytes::from_static(b"first"))
        );
        assert_eq!(
            pipes.read(port),
            ReadOutcome::Chunk(Bytes::from_static(b"second"))
        );
        assert_eq!(pipes.read(port), ReadOutcome::Empty);
    }

    #[test]
    fn zero_length_chunk_closes_and_read_drains_to_closed() {
        let mut pipes = manager();
        let now = Instant::now();
        let port = pipes.open(PEER, 1, PipeDirection::Report, now).unwrap();

        pipes.feed(port, 0, Bytes::from_static(b"tail"), now);
        pipes.feed(port, 1, Bytes::new(), now);

        assert_eq!(
            pipes.read(port),
            ReadOutcome::Chunk(Bytes::from_static(b"tail"))
        );
        assert_eq!(pipes.read(port), ReadOutcome::Closed);
        assert_eq!(pipes.open_count(), 0);
    }

    #[test]
    fn inbound_overflow_is_reported_not_buffered() {
        let mut pipes = PipeManager::new(2, Duration::from_secs(30));
        let now = Instant::now();
        let port = pipes.open(PEER, 1, PipeDirection::Report, now).unwrap();

        assert_eq!(pipes.feed(port, 0, Bytes::from_static(b"a"), now), FeedOutcome::Accepted);
        assert_eq!(pipes.feed(port, 1, Bytes::from_static(b"b"), now), FeedOutcome::Accepted);
        assert_eq!(pipes.feed(port, 2, Bytes::from_static(b"c"), now), FeedOutcome::Overflow);

        // Accepted data intact and ordered.
        assert_eq!(pipes.read(port), ReadOutcome::Chunk(Bytes::from_static(b"a")));
        assert_eq!(pipes.read(port), ReadOutcome::Chunk(Bytes::from_static(b"b")));
    }

    #[test]
    fn idle_pipes_are_swept() {
        let mut pipes = PipeManager::new(4, Duration::from_millis(10));
        let past = Instant::now() - Duration::from_secs(1);
        let port = pipes.open(PEER, 1, PipeDirection::Report, past).unwrap();

        assert_eq!(pipes.sweep(Instant::now()), vec![port]);
        assert_eq!(pipes.open_count(), 0);
    }

    #[test]
    fn peer_teardown_drops_all_its_pipes() {
        let mut pipes = manager();
        let now = Instant::now();
        pipes.open(PEER, 1, PipeDirection::Command, now).unwrap();
        pipes.open(PEER, 2, PipeDirection::Report, now).unwrap();
        pipes.open(0x1234, 1, PipeDirection::Command, now).unwrap();

        assert_eq!(pipes.drop_for_peer(PEER), 2);
        assert_eq!(pipes.open_count(), 1);
    }

    #[test]
    fn write_after_close_is_rejected() {
        let mut pipes = manager();
        let now = Instant::now();
        let port = pipes.open(PEER, 1, PipeDirection::Command, now).unwrap();
        pipes.close(port).unwrap();

        let err = pipes.write(port, Bytes::from_static(b"late"), now).unwrap_err();
        assert!(matches!(err, BusError::PipeClosed { .. }));
    }
}
