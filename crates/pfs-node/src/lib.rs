//! Storage node daemon.
//!
//! A storage node is an opaque block store: it serves read/write/delete
//! requests for whole files laid out flat under a storage directory, with
//! no knowledge of striping or tokens. The metadata service and clients
//! agree on which bytes live here; the node just moves them.

#![forbid(unsafe_code)]

pub mod server;
pub mod store;

pub use server::NodeServer;
pub use store::BlockStore;

use thiserror::Error;

/// Storage node errors.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] pfs_transport::TransportError),

    #[error("invalid file name {0:?}")]
    InvalidName(String),
}
