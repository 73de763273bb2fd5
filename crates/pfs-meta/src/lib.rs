//! Metadata service.
//!
//! The service owns the authoritative file catalog and the token table.
//! Clients talk to it over two surfaces: unary metadata operations
//! (create/fetch/update/delete) and one long-lived token stream per client
//! over which byte-range tokens are requested, granted and revoked.

#![forbid(unsafe_code)]

pub mod catalog;
pub mod engine;
pub mod server;

pub use catalog::Catalog;
pub use engine::{Token, TokenEngine};
pub use server::MetaServer;

use pfs_msg::{ErrorKind, WireError};
use thiserror::Error;

/// Metadata service errors.
#[derive(Error, Debug)]
pub enum MetaError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("file {0:?} not found")]
    NotFound(String),

    #[error("file {0:?} already exists")]
    AlreadyExists(String),

    #[error("file {0:?} is locked by active tokens")]
    Busy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] pfs_transport::TransportError),
}

impl MetaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetaError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            MetaError::NotFound(_) => ErrorKind::NotFound,
            MetaError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            MetaError::Busy(_) => ErrorKind::Busy,
            MetaError::Io(_) | MetaError::Transport(_) => ErrorKind::Transport,
        }
    }

    pub fn to_wire(&self) -> WireError {
        WireError::new(self.kind(), self.to_string())
    }
}

/// Metadata service result type.
pub type Result<T> = std::result::Result<T, MetaError>;
