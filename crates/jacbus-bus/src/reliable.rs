//! Reliable-command bookkeeping.
//!
//! The sender side tracks ack-requested frames by CRC and resends them on a
//! timer until acked or the budget runs out. The receiver side deduplicates
//! `ReliableCommands` seeds so a resent frame is applied at most once —
//! at-most-once delivery is the receiver's guarantee, never the sender's.

use std::collections::{HashSet, VecDeque};
use std::sync::mpsc::Sender;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::config::BusConfig;
use crate::error::BusError;

/// How many distinct seeds the receiver remembers.
const SEEN_SEED_CAPACITY: usize = 64;

/// An ack-requested frame awaiting its CRC acknowledgement.
struct PendingAck {
    crc: u16,
    frame: Bytes,
    target: u64,
    sent_at: Instant,
    resends: u32,
    reply: Sender<Result<(), BusError>>,
}

/// Sender-side retry state plus receiver-side seed dedup.
pub struct ReliableTracker {
    pending: Vec<PendingAck>,
    seen_order: VecDeque<u32>,
    seen: HashSet<u32>,
}

impl ReliableTracker {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            seen_order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Start waiting for the ack of a just-transmitted frame.
    pub fn track(
        &mut self,
        crc: u16,
        frame: Bytes,
        target: u64,
        reply: Sender<Result<(), BusError>>,
        now: Instant,
    ) {
        trace!(crc = %format_args!("{crc:#06x}"), "tracking ack");
        self.pending.push(PendingAck {
            crc,
            frame,
            target,
            sent_at: now,
            resends: 0,
            reply,
        });
    }

    /// Resolve a CRC acknowledgement; true if it matched a pending frame.
    pub fn on_ack(&mut self, crc: u16) -> bool {
        let Some(at) = self.pending.iter().position(|p| p.crc == crc) else {
            return false;
        };
        let pending = self.pending.swap_remove(at);
        trace!(crc = %format_args!("{crc:#06x}"), "acked");
        let _ = pending.reply.send(Ok(()));
        true
    }

    /// Advance timers: expire exhausted entries with `AckTimeout`, return
    /// frames due for another transmission.
    pub fn poll(&mut self, now: Instant, cfg: &BusConfig) -> Vec<Bytes> {
        let mut resend = Vec::new();
        let mut index = 0;
        while index < self.pending.len() {
            let pending = &mut self.pending[index];
            if now.duration_since(pending.sent_at) < cfg.ack_timeout {
                index += 1;
                continue;
            }
            if pending.resends >= cfg.max_resends {
                let pending = self.pending.swap_remove(index);
                debug!(
                    crc = %format_args!("{:#06x}", pending.crc),
                    resends = pending.resends,
                    "ack budget exhausted"
                );
                let _ = pending.reply.send(Err(BusError::AckTimeout(cfg.ack_timeout)));
                continue;
            }
            pending.resends += 1;
            pending.sent_at = now;
            resend.push(pending.frame.clone());
            index += 1;
        }
        resend
    }

    /// Cancel every pending retry addressed to a device.
    pub fn cancel_for(&mut self, target: u64) {
        let mut index = 0;
        while index < self.pending.len() {
            if self.pending[index].target == target {
                let pending = self.pending.swap_remove(index);
                let _ = pending.reply.send(Err(BusError::Cancelled));
            } else {
                index += 1;
            }
        }
    }

    /// Receiver-side dedup: true if the seed is new (process the command),
    /// false if it was already seen (drop it).
    pub fn check_seed(&mut self, seed: u32) -> bool {
        if self.seen.contains(&seed) {
            return false;
        }
        if self.seen_order.len() >= SEEN_SEED_CAPACITY {
            if let Some(evicted) = self.seen_order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen_order.push_back(seed);
        self.seen.insert(seed);
        true
    }

    /// Frames currently awaiting acknowledgement.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for ReliableTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    fn config() -> BusConfig {
        let mut cfg = BusConfig::new(1);
        cfg.ack_timeout = Duration::from_millis(10);
        cfg.max_resends = 2;
        cfg
    }

    #[test]
    fn ack_resolves_pending() {
        let mut tracker = ReliableTracker::new();
        let (tx, rx) = mpsc::channel();
        tracker.track(0xbeef, Bytes::from_static(b"frame"), 7, tx, Instant::now());

        assert!(tracker.on_ack(0xbeef));
        assert!(rx.recv().unwrap().is_ok());
        assert_eq!(tracker.pending_count(), 0);
        assert!(!tracker.on_ack(0xbeef), "second ack is a no-op");
    }

    #[test]
    fn timeout_resends_then_expires() {
        let cfg = config();
        let mut tracker = ReliableTracker::new();
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        tracker.track(0x0101, Bytes::from_static(b"frame"), 7, tx, start);

        let later = start + Duration::from_millis(20);
        assert_eq!(tracker.poll(later, &cfg).len(), 1, "first resend");
        let later = later + Duration::from_millis(20);
        assert_eq!(tracker.poll(later, &cfg).len(), 1, "second resend");
        let later = later + Duration::from_millis(20);
        assert!(tracker.poll(later, &cfg).is_empty(), "budget spent");

        assert!(matches!(rx.recv().unwrap(), Err(BusError::AckTimeout(_))));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn not_resent_before_timeout() {
        let cfg = config();
        let mut tracker = ReliableTracker::new();
        let (tx, _rx) = mpsc::channel();
        let start = Instant::now();
        tracker.track(0x0202, Bytes::from_static(b"frame"), 7, tx, start);

        assert!(tracker.poll(start + Duration::from_millis(5), &cfg).is_empty());
    }

    #[test]
    fn cancel_for_target_completes_with_cancelled() {
        let mut tracker = ReliableTracker::new();
        let (tx1, rx1) = mpsc::channel();
        let (tx2, rx2) = mpsc::channel();
        let now = Instant::now();
        tracker.track(1, Bytes::from_static(b"a"), 7, tx1, now);
        tracker.track(2, Bytes::from_static(b"b"), 9, tx2, now);

        tracker.cancel_for(7);
        assert!(matches!(rx1.recv().unwrap(), Err(BusError::Cancelled)));
        assert!(rx2.try_recv().is_err(), "other target untouched");
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn seed_dedup_is_at_most_once() {
        let mut tracker = ReliableTracker::new();
        assert!(tracker.check_seed(0x1234_5678));
        assert!(!tracker.check_seed(0x1234_5678));
        assert!(tracker.check_seed(0x9999_0000));
    }

    #[test]
    fn seed_memory_is_bounded() {
        let mut tracker = ReliableTracker::new();
        for seed in 0..SEEN_SEED_CAPACITY as u32 + 10 {
            assert!(tracker.check_seed(seed));
        }
        // The oldest seeds have been forgotten; recent ones have not.
        assert!(!tracker.check_seed(SEEN_SEED_CAPACITY as u32 + 9));
        assert!(tracker.check_seed(0));
    }
}
