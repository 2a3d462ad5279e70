//! Error types for the election module

use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum ElectionError {
    /// Failed to bind the peer listener.
    #[error("failed to bind peer listener: {0}")]
    Bind(std::io::Error),

    /// Transport I/O failure.
    #[error("peer i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame failed to encode or decode.
    #[error("invalid peer message: {0}")]
    Codec(#[from] serde_json::Error),

    /// A frame exceeded the protocol's size bound.
    #[error("peer frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    /// Connecting to a peer timed out.
    #[error("timed out connecting to peer at {0}")]
    ConnectTimeout(String),

    /// The service was started twice.
    #[error("election manager already started")]
    AlreadyStarted,
}
