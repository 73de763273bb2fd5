//! Framed TCP transport for the PFS protocol.
//!
//! Every PFS connection carries a sequence of frames: a fixed header
//! (magic + payload length, big-endian) followed by one little-endian
//! [`binrw`] message from `pfs-msg`. The same framing is used on the
//! metadata surface, the token stream and the storage surface.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod frame;
pub mod tcp;

pub use config::ClusterList;
pub use error::TransportError;
pub use frame::{FrameHeader, MAX_FRAME_SIZE};
pub use tcp::{ConnectionReader, ConnectionWriter, PfsConnection};

use std::time::Duration;

/// Default connect/IO deadline used when a config does not override it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
