//! Shared-medium wire abstraction for jacbus.
//!
//! The bus layer consumes a [`Wire`]: transmit a frame datagram, receive with
//! a timeout, and sense carrier. Two implementations ship here:
//! - [`LoopbackBus`] / [`LoopbackWire`] — an in-memory medium for tests and
//!   in-process topologies, with deterministic collision injection.
//! - [`UdsHub`] / [`UdsWire`] — a Unix-socket hub that rebroadcasts each
//!   client's frames to every other client, so separate processes share a bus.
//!
//! Real UART/radio drivers implement [`Wire`] outside this workspace.

pub mod error;
pub mod loopback;
pub mod traits;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use loopback::{LoopbackBus, LoopbackWire};
pub use traits::Wire;
#[cfg(unix)]
pub use uds::{UdsHub, UdsWire, MAX_DATAGRAM};
