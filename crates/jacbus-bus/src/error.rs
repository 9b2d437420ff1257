use std::time::Duration;

/// Errors surfaced by bus-node operations.
///
/// Frame integrity failures never appear here: the receive path drops those
/// silently and only bumps [`BusStats`](crate::stats::BusStats) counters.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Frame-level error on the send path (e.g. payload too large).
    #[error("frame error: {0}")]
    Frame(#[from] jacbus_frame::FrameError),

    /// Wire-level error.
    #[error("transport error: {0}")]
    Transport(#[from] jacbus_transport::TransportError),

    /// Payload coding error.
    #[error("spec error: {0}")]
    Spec(#[from] jacbus_spec::SpecError),

    /// The addressed service index has no announced service behind it.
    #[error("unknown service index {service_index} on device {device_id:#018x}")]
    UnknownService { device_id: u64, service_index: u8 },

    /// The pipe's bounded buffer is full; the write was not accepted.
    #[error("pipe {port} buffer full")]
    PipeFull { port: u8 },

    /// The pipe is closed (or never existed).
    #[error("pipe {port} closed")]
    PipeClosed { port: u8 },

    /// All pipe ports are in use.
    #[error("no free pipe port")]
    NoFreePort,

    /// No acknowledgement arrived within the retry budget.
    #[error("no ack within {0:?}")]
    AckTimeout(Duration),

    /// The back-off retry budget was exhausted without a clean transmission.
    #[error("transmit failed after {retries} retries")]
    TransmitFailed { retries: u32 },

    /// The operation's target went away (device evicted or restarted).
    #[error("operation cancelled")]
    Cancelled,

    /// The bus node has shut down.
    #[error("bus closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BusError>;
