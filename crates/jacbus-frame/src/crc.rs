//! Frame integrity checksum.
//!
//! Every node on the bus stamps and verifies the same 16-bit CRC, so the
//! algorithm is not configurable: CRC-16/CCITT-FALSE (poly 0x1021, init
//! 0xFFFF, no reflection). `CRC_16_IBM_3740` is that algorithm's registry
//! name in the `crc` crate.

use crc::{Crc, CRC_16_IBM_3740};

pub const FRAME_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the frame CRC over `bytes`.
pub fn crc16(bytes: &[u8]) -> u16 {
    FRAME_CRC.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // CRC-16/CCITT-FALSE check value for "123456789".
        assert_eq!(crc16(b"123456789"), 0x29b1);
    }

    #[test]
    fn empty_input_is_init_value() {
        assert_eq!(crc16(&[]), 0xffff);
    }

    #[test]
    fn deterministic() {
        let data = [0x42u8; 64];
        assert_eq!(crc16(&data), crc16(&data));
    }

    #[test]
    fn single_bit_changes_crc() {
        let a = [0x00u8, 0x01, 0x02, 0x03];
        let mut b = a;
        b[2] ^= 0x01;
        assert_ne!(crc16(&a), crc16(&b));
    }
}
