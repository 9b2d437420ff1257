use std::path::PathBuf;

/// Errors that can occur in wire transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the hub socket.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the hub socket.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming hub connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the wire.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The medium reported a bit-level conflict during transmission.
    #[error("collision detected on the wire")]
    Collision,

    /// The wire has been shut down or every peer is gone.
    #[error("wire closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
