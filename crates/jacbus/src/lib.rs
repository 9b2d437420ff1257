//! Umbrella crate: re-exports the jacbus workspace API.
//!
//! - [`frame`] — CRC-checked frame codec and packet multiplexing
//! - [`spec`] — service-class catalogue and pack-format payload codec
//! - [`transport`] — wire abstraction (loopback medium, frames-over-UDS hub)
//! - [`bus`] — the bus node: scheduler, registry, pipes, reliable commands

pub use jacbus_bus as bus;
pub use jacbus_frame as frame;
pub use jacbus_spec as spec;
pub use jacbus_transport as transport;

pub use jacbus_bus::{Bus, BusConfig, BusError, BusHandle, RoutedPacket};
pub use jacbus_frame::{Frame, FrameFlags, Packet};
pub use jacbus_transport::{LoopbackBus, Wire};
