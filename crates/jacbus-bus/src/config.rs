use std::time::Duration;

use jacbus_spec::SYSTEM_ANNOUNCE_INTERVAL_MS;

/// Bus node configuration.
///
/// Defaults match the protocol constants (500 ms announce cycle, devices
/// lost after three silent cycles); the back-off and pipe numbers are local
/// tuning knobs with conservative defaults.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// This node's 8-byte device identifier.
    pub device_id: u64,
    /// Service classes hosted by this node, in announce order
    /// (service index 1 onward; index 0 is always control).
    pub services: Vec<u32>,
    /// Interval between announce broadcasts.
    pub announce_interval: Duration,
    /// A device silent for this many announce intervals is evicted.
    pub lost_after: u32,
    /// Carrier-sense gap: the medium must be quiet this long before we transmit.
    pub min_gap: Duration,
    /// Receive-poll granularity of the bus daemon.
    pub poll_interval: Duration,
    /// How long to wait for an ACK before resending.
    pub ack_timeout: Duration,
    /// Resend budget for ack-requested frames.
    pub max_resends: u32,
    /// Back-off slot length; delays are a random slot count.
    pub backoff_slot: Duration,
    /// Cap on the back-off exponent (delay ≤ 2^cap slots).
    pub max_backoff_exp: u32,
    /// Transmission retry budget after collisions.
    pub max_retries: u32,
    /// Per-pipe buffer capacity, in chunks.
    pub pipe_capacity: usize,
    /// Pipes idle longer than this are torn down.
    pub pipe_idle_timeout: Duration,
}

impl BusConfig {
    /// Configuration for a device with the given identifier.
    pub fn new(device_id: u64) -> Self {
        Self {
            device_id,
            services: Vec::new(),
            announce_interval: Duration::from_millis(SYSTEM_ANNOUNCE_INTERVAL_MS as u64),
            lost_after: 3,
            min_gap: Duration::from_millis(1),
            poll_interval: Duration::from_millis(2),
            ack_timeout: Duration::from_millis(100),
            max_resends: 4,
            backoff_slot: Duration::from_millis(1),
            max_backoff_exp: 8,
            max_retries: 4,
            pipe_capacity: 4,
            pipe_idle_timeout: Duration::from_secs(30),
        }
    }

    /// Host the given service classes (announce order).
    pub fn with_services(mut self, services: &[u32]) -> Self {
        self.services = services.to_vec();
        self
    }

    /// Override the announce interval (tests mostly).
    pub fn with_announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval;
        self
    }

    /// Override the ACK timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Override the per-pipe buffer capacity.
    pub fn with_pipe_capacity(mut self, chunks: usize) -> Self {
        self.pipe_capacity = chunks;
        self
    }

    /// Silence span after which a device is considered lost.
    pub fn lost_timeout(&self) -> Duration {
        self.announce_interval * self.lost_after
    }

    /// True when this node hosts no services (client-only).
    pub fn is_client(&self) -> bool {
        self.services.is_empty()
    }
}
