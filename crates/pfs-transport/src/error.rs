//! Transport error type.

use thiserror::Error;

/// Errors produced while framing, connecting, or moving bytes.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message codec error: {0}")]
    Codec(#[from] binrw::Error),

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(u32),

    #[error("connection closed by peer")]
    Closed,

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("invalid cluster list: {0}")]
    InvalidClusterList(String),
}

impl TransportError {
    /// Whether this error is a clean end-of-stream rather than a fault.
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}
