//! CRC-checked frame codec and packet multiplexing for the jacbus wire protocol.
//!
//! This is the bottom layer of jacbus. Every bus transmission is a frame with:
//! - A 1-byte payload length (max 236)
//! - A 2-byte CRC-16/CCITT-FALSE over everything that follows it
//! - An 8-byte device identifier and a flags byte
//!
//! One frame multiplexes one or more service-addressed packets; see [`packet`].

pub mod codec;
pub mod crc;
pub mod error;
pub mod flags;
pub mod packet;

pub use codec::{decode_frame, encode_frame, Frame, HEADER_SIZE, MAX_PAYLOAD};
pub use crc::crc16;
pub use error::{FrameError, Result};
pub use flags::FrameFlags;
pub use packet::{
    join, split, CommandKind, Packet, CMD_GET_REGISTER, CMD_PIPE_PAGE, CMD_REGISTER_MASK,
    CMD_SET_REGISTER, MAX_PACKET_PAYLOAD, PACKET_HEADER_SIZE, SERVICE_INDEX_ACK,
    SERVICE_INDEX_CONTROL,
};
