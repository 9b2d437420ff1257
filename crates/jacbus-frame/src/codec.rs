use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::crc::crc16;
use crate::error::{FrameError, Result};
use crate::flags::FrameFlags;

/// Frame header: length (1) + crc (2) + device id (8) + flags (1) = 12 bytes.
pub const HEADER_SIZE: usize = 12;

/// Maximum frame payload size in bytes.
pub const MAX_PAYLOAD: usize = 236;

/// Offset of the CRC-covered region: everything after the crc field.
const CRC_BODY_OFFSET: usize = 3;

/// A single bus transmission unit.
///
/// Wire format (little-endian):
/// ```text
/// ┌────────────┬───────────┬────────────────┬───────────┬──────────────────┐
/// │ Length (1B)│ CRC (2B)  │ Device id (8B) │ Flags (1B)│ Payload           │
/// │ payload len│ LE        │ LE             │           │ (Length bytes)    │
/// └────────────┴───────────┴────────────────┴───────────┴──────────────────┘
/// ```
/// The CRC covers the device id, flags, and payload. The length field counts
/// payload bytes only and is bounded by [`MAX_PAYLOAD`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Target device (command frames) or sender (report frames).
    pub device_id: u64,
    /// Header flag bits.
    pub flags: FrameFlags,
    /// The frame payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(device_id: u64, flags: FrameFlags, payload: impl Into<Bytes>) -> Self {
        Self {
            device_id,
            flags,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode into a standalone buffer, stamping length and CRC.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_frame(self, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode a complete frame from an exact datagram buffer.
    ///
    /// Unlike [`decode_frame`], trailing bytes are a [`FrameError::LengthMismatch`]:
    /// a datagram carries exactly one frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Frame> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                len: bytes.len(),
                header: HEADER_SIZE,
            });
        }

        let declared = bytes[0] as usize;
        if declared > MAX_PAYLOAD {
            return Err(FrameError::FrameTooLarge {
                size: declared,
                max: MAX_PAYLOAD,
            });
        }
        if bytes.len() != HEADER_SIZE + declared {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: bytes.len() - HEADER_SIZE,
            });
        }

        let stored = u16::from_le_bytes([bytes[1], bytes[2]]);
        let computed = crc16(&bytes[CRC_BODY_OFFSET..]);
        if stored != computed {
            return Err(FrameError::CrcMismatch { stored, computed });
        }

        let device_id = u64::from_le_bytes(bytes[3..11].try_into().expect("8-byte slice"));
        let flags = FrameFlags::from_bits_truncate(bytes[11]);

        Ok(Frame {
            device_id,
            flags,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }
}

/// Encode a frame into the wire format, stamping length and CRC.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    if frame.payload.len() > MAX_PAYLOAD {
        return Err(FrameError::FrameTooLarge {
            size: frame.payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let start = dst.len();
    dst.reserve(HEADER_SIZE + frame.payload.len());
    dst.put_u8(frame.payload.len() as u8);
    dst.put_u16_le(0); // crc placeholder
    dst.put_u64_le(frame.device_id);
    dst.put_u8(frame.flags.bits());
    dst.put_slice(&frame.payload);

    let crc = crc16(&dst[start + CRC_BODY_OFFSET..]);
    dst[start + 1..start + 3].copy_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// Decode a frame from a byte-stream buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. On CRC mismatch the
/// offending frame's bytes are consumed too, so the caller can count the drop
/// and keep reading.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let declared = src[0] as usize;
    if declared > MAX_PAYLOAD {
        return Err(FrameError::FrameTooLarge {
            size: declared,
            max: MAX_PAYLOAD,
        });
    }

    let total = HEADER_SIZE + declared;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    let stored = u16::from_le_bytes([src[1], src[2]]);
    let computed = crc16(&src[CRC_BODY_OFFSET..total]);
    if stored != computed {
        src.advance(total);
        return Err(FrameError::CrcMismatch { stored, computed });
    }

    let device_id = u64::from_le_bytes(src[3..11].try_into().expect("8-byte slice"));
    let flags = FrameFlags::from_bits_truncate(src[11]);
    src.advance(HEADER_SIZE);
    let payload = src.split_to(declared).freeze();

    Ok(Some(Frame {
        device_id,
        flags,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE: u64 = 0x1122_3344_5566_7788;

    #[test]
    fn encode_decode_roundtrip() {
        let frame = Frame::new(DEVICE, FrameFlags::COMMAND, b"hello, bus".to_vec());
        let wire = frame.to_bytes().unwrap();

        assert_eq!(wire.len(), HEADER_SIZE + 10);
        assert_eq!(wire[0], 10);

        let decoded = Frame::from_bytes(&wire).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let frame = Frame::new(DEVICE, FrameFlags::empty(), Bytes::new());
        let wire = frame.to_bytes().unwrap();
        assert_eq!(Frame::from_bytes(&wire).unwrap(), frame);
    }

    #[test]
    fn too_short_buffer() {
        let err = Frame::from_bytes(&[0u8; 7]).unwrap_err();
        assert!(matches!(err, FrameError::TooShort { len: 7, .. }));
    }

    #[test]
    fn length_field_must_match_buffer() {
        let frame = Frame::new(DEVICE, FrameFlags::empty(), b"abcd".to_vec());
        let mut wire = frame.to_bytes().unwrap().to_vec();
        wire.push(0x00); // trailing garbage

        let err = Frame::from_bytes(&wire).unwrap_err();
        assert!(matches!(
            err,
            FrameError::LengthMismatch {
                declared: 4,
                actual: 5
            }
        ));
    }

    #[test]
    fn any_corrupted_payload_byte_is_a_crc_mismatch() {
        let frame = Frame::new(DEVICE, FrameFlags::ACK_REQUESTED, vec![0xA5; 32]);
        let wire = frame.to_bytes().unwrap();

        for i in HEADER_SIZE..wire.len() {
            let mut corrupted = wire.to_vec();
            corrupted[i] ^= 0x10;
            let err = Frame::from_bytes(&corrupted).unwrap_err();
            assert!(
                matches!(err, FrameError::CrcMismatch { .. }),
                "byte {i} flip must fail crc, got {err:?}"
            );
        }
    }

    #[test]
    fn corrupted_header_is_a_crc_mismatch() {
        let frame = Frame::new(DEVICE, FrameFlags::empty(), b"x".to_vec());
        let mut wire = frame.to_bytes().unwrap().to_vec();
        wire[5] ^= 0x01; // inside device id

        let err = Frame::from_bytes(&wire).unwrap_err();
        assert!(matches!(err, FrameError::CrcMismatch { .. }));
    }

    #[test]
    fn oversized_payload_rejected_on_encode() {
        let frame = Frame::new(DEVICE, FrameFlags::empty(), vec![0u8; MAX_PAYLOAD + 1]);
        let err = frame.to_bytes().unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { size: 237, .. }));
    }

    #[test]
    fn max_payload_accepted() {
        let frame = Frame::new(DEVICE, FrameFlags::empty(), vec![0x5Au8; MAX_PAYLOAD]);
        let wire = frame.to_bytes().unwrap();
        assert_eq!(Frame::from_bytes(&wire).unwrap(), frame);
    }

    #[test]
    fn stream_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x04u8, 0x00, 0x00][..]);
        assert!(decode_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn stream_decode_incomplete_payload() {
        let frame = Frame::new(DEVICE, FrameFlags::empty(), b"hello".to_vec());
        let wire = frame.to_bytes().unwrap();
        let mut buf = BytesMut::from(&wire[..wire.len() - 2]);
        assert!(decode_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn stream_decode_multiple_frames() {
        let first = Frame::new(1, FrameFlags::empty(), b"one".to_vec());
        let second = Frame::new(2, FrameFlags::COMMAND, b"two".to_vec());

        let mut buf = BytesMut::new();
        encode_frame(&first, &mut buf).unwrap();
        encode_frame(&second, &mut buf).unwrap();

        assert_eq!(decode_frame(&mut buf).unwrap().unwrap(), first);
        assert_eq!(decode_frame(&mut buf).unwrap().unwrap(), second);
        assert!(buf.is_empty());
    }

    #[test]
    fn stream_decode_skips_corrupt_frame_and_recovers() {
        let bad = Frame::new(1, FrameFlags::empty(), b"bad".to_vec());
        let good = Frame::new(2, FrameFlags::empty(), b"good".to_vec());

        let mut buf = BytesMut::new();
        encode_frame(&bad, &mut buf).unwrap();
        let corrupt_at = HEADER_SIZE; // first payload byte of `bad`
        buf[corrupt_at] ^= 0xFF;
        encode_frame(&good, &mut buf).unwrap();

        assert!(matches!(
            decode_frame(&mut buf),
            Err(FrameError::CrcMismatch { .. })
        ));
        assert_eq!(decode_frame(&mut buf).unwrap().unwrap(), good);
    }
}
