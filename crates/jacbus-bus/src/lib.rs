//! Bus node for jacbus.
//!
//! One daemon thread per node drives everything the shared wire requires:
//! CSMA/CA transmit scheduling with randomized exponential back-off, the
//! periodic announce cycle, the device/service registry, streaming pipes,
//! and reliable (seed-deduplicated, ack-tracked) commands. Handles interact
//! with the daemon over channels; protocol state has exactly one writer.

pub mod config;
pub mod error;
pub mod node;
pub mod pipe;
pub mod registry;
pub mod reliable;
pub mod scheduler;
pub mod stats;

pub use config::BusConfig;
pub use error::{BusError, Result};
pub use node::{Bus, BusHandle, DeviceSnapshot, PipeReader, RoutedPacket, ServiceSnapshot};
pub use pipe::{PipeDirection, PipeState};
pub use registry::{AnnounceOutcome, Device, Registry, ServiceInstance};
pub use scheduler::TxState;
pub use stats::BusStats;
