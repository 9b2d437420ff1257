/// Diagnostic counters for one bus node.
///
/// Integrity failures and routing misses land here instead of propagating:
/// the bus is lossy and best-effort, so the receive path only counts them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BusStats {
    /// Datagrams seen on the wire, valid or not.
    pub frames_received: u64,
    /// Frames transmitted cleanly.
    pub frames_sent: u64,
    /// Frames dropped for a CRC mismatch.
    pub crc_errors: u64,
    /// Frames dropped for being shorter than the header.
    pub frames_too_short: u64,
    /// Frames or sub-records dropped for a length mismatch.
    pub length_mismatches: u64,
    /// Packets dropped because no announced service matched.
    pub unroutable_packets: u64,
    /// Reliable commands dropped by seed deduplication.
    pub duplicate_seeds: u64,
    /// Collisions reported by the wire.
    pub collisions: u64,
    /// CRC acknowledgements transmitted.
    pub acks_sent: u64,
    /// Pipe chunks dropped because the inbound buffer was full.
    pub pipe_overflows: u64,
    /// Devices evicted after announce silence.
    pub devices_evicted: u64,
}
