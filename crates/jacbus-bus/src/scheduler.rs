//! CSMA/CA transmit scheduling.
//!
//! One state machine per node: `Idle` with nothing to send, `Listening` for a
//! quiet medium, `Transmitting` (the wire call itself; the scheduler owns the
//! outbound buffer exclusively for its duration), and `BackOff` after a
//! collision. Back-off delays are a random number of slots, the range
//! doubling with every retry up to a cap; the retry budget bounds how long a
//! frame can fight for the wire before it fails with `TransmitFailed`.

use std::collections::VecDeque;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use tracing::{debug, trace, warn};

use jacbus_transport::{TransportError, Wire};

use crate::config::BusConfig;
use crate::error::BusError;

/// Transmit-side state, advanced by [`Scheduler::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Listening,
    Transmitting,
    BackOff,
}

/// Ack tracking request attached to a first transmission.
pub struct AckTrack {
    pub crc: u16,
    pub target: u64,
    pub reply: Sender<Result<(), BusError>>,
}

/// A frame queued for transmission.
pub struct Outbound {
    pub bytes: Bytes,
    /// Completion signal for plain sends; `None` for fire-and-forget.
    pub reply: Option<Sender<Result<(), BusError>>>,
    /// Present when the frame wants an ack tracked after transmission.
    pub ack: Option<AckTrack>,
}

impl Outbound {
    /// Fire-and-forget frame (announces, acks, pipe chunks, resends).
    pub fn untracked(bytes: Bytes) -> Self {
        Self {
            bytes,
            reply: None,
            ack: None,
        }
    }
}

/// What one poll step produced.
pub enum TxOutcome {
    /// Frame left the wire cleanly.
    Sent(Outbound),
    /// Retry budget exhausted; the frame was dropped.
    Dropped(Outbound, u32),
    /// A collision was detected; the frame stays queued.
    Collided,
}

/// The transmit queue and CSMA state machine.
pub struct Scheduler {
    state: TxState,
    queue: VecDeque<Outbound>,
    retries: u32,
    backoff_until: Option<Instant>,
    rng: SmallRng,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: TxState::Idle,
            queue: VecDeque::new(),
            retries: 0,
            backoff_until: None,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Queue a frame for transmission.
    pub fn enqueue(&mut self, outbound: Outbound) {
        self.queue.push_back(outbound);
        if self.state == TxState::Idle {
            self.state = TxState::Listening;
        }
    }

    /// Current state (diagnostics).
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Frames waiting for the wire.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Advance the state machine; transmits at most one frame.
    pub fn poll(&mut self, wire: &mut dyn Wire, cfg: &BusConfig, now: Instant) -> Option<TxOutcome> {
        match self.state {
            TxState::Idle => {
                if !self.queue.is_empty() {
                    self.state = TxState::Listening;
                }
                None
            }
            TxState::BackOff => {
                if self.backoff_until.is_none_or(|until| now >= until) {
                    self.backoff_until = None;
                    self.state = TxState::Listening;
                }
                None
            }
            TxState::Listening => {
                if self.queue.is_empty() {
                    self.state = TxState::Idle;
                    return None;
                }
                if !wire.idle_for(cfg.min_gap) {
                    // Carrier present; keep listening.
                    return None;
                }
                self.transmit(wire, cfg, now)
            }
            // Transmission is synchronous; poll never observes this state.
            TxState::Transmitting => None,
        }
    }

    fn transmit(&mut self, wire: &mut dyn Wire, cfg: &BusConfig, now: Instant) -> Option<TxOutcome> {
        let outbound = self.queue.front().expect("queue checked non-empty");
        self.state = TxState::Transmitting;

        match wire.send(&outbound.bytes) {
            Ok(()) => {
                self.state = if self.queue.len() > 1 {
                    TxState::Listening
                } else {
                    TxState::Idle
                };
                self.retries = 0;
                let outbound = self.queue.pop_front().expect("frame still queued");
                trace!(len = outbound.bytes.len(), "frame transmitted");
                Some(TxOutcome::Sent(outbound))
            }
            Err(TransportError::Collision) => {
                self.retries += 1;
                if self.retries > cfg.max_retries {
                    let retries = self.retries;
                    self.retries = 0;
                    self.state = if self.queue.len() > 1 {
                        TxState::Listening
                    } else {
                        TxState::Idle
                    };
                    let outbound = self.queue.pop_front().expect("frame still queued");
                    warn!(retries, "retry budget exhausted, dropping frame");
                    return Some(TxOutcome::Dropped(outbound, retries));
                }
                let delay = self.backoff_delay(cfg);
                debug!(retry = self.retries, ?delay, "collision, backing off");
                self.backoff_until = Some(now + delay);
                self.state = TxState::BackOff;
                Some(TxOutcome::Collided)
            }
            Err(err) => {
                warn!(%err, "wire send failed, dropping frame");
                self.retries = 0;
                self.state = if self.queue.len() > 1 {
                    TxState::Listening
                } else {
                    TxState::Idle
                };
                let outbound = self.queue.pop_front().expect("frame still queued");
                Some(TxOutcome::Dropped(outbound, 0))
            }
        }
    }

    /// Randomized exponential back-off: `rand(0..2^k)` slots, `k` capped.
    fn backoff_delay(&mut self, cfg: &BusConfig) -> Duration {
        let exponent = self.retries.min(cfg.max_backoff_exp);
        let slots = self.rng.gen_range(0..(1u32 << exponent) + 1);
        cfg.backoff_slot * slots
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
