/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffer is shorter than the fixed frame header.
    #[error("frame too short ({len} bytes, header is {header})")]
    TooShort { len: usize, header: usize },

    /// The declared payload length disagrees with the bytes present.
    #[error("frame length mismatch (declared {declared}, actual {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// The stored CRC does not match the CRC recomputed over the frame body.
    #[error("frame crc mismatch (stored {stored:#06x}, computed {computed:#06x})")]
    CrcMismatch { stored: u16, computed: u16 },

    /// The payload exceeds the wire budget.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
