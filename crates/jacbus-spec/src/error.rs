/// Errors from pack-format parsing and payload coding.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// A pack-format token was not recognized.
    #[error("unrecognized pack token `{0}`")]
    BadToken(String),

    /// A fixed-size field follows a variable-length one.
    #[error("field after variable-length field in `{0}`")]
    TrailingConflict(String),

    /// The payload ended before the format was satisfied.
    #[error("payload truncated (needed {needed} more bytes, had {had})")]
    Truncated { needed: usize, had: usize },

    /// A value's type does not match its format field.
    #[error("value {index} has the wrong type (expected {expected})")]
    TypeMismatch { index: usize, expected: &'static str },

    /// The value list length does not match the format.
    #[error("wrong number of values (format takes {expected}, got {got})")]
    Arity { expected: usize, got: usize },

    /// A `z` string value contains an interior NUL byte.
    #[error("string contains interior NUL")]
    InteriorNul,

    /// A numeric value does not fit its field width.
    #[error("value {index} out of range for {width}-bit field")]
    OutOfRange { index: usize, width: u8 },

    /// Bytes or string data longer than the sized field holding it.
    #[error("value {index} too long for {max}-byte field")]
    TooLong { index: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, SpecError>;
