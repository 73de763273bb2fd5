//! Client error type.

use pfs_msg::{ErrorKind, WireError};
use pfs_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by the client API.
///
/// `Transport` errors are never retried internally: the call fails and
/// local state (open files, locally held tokens) is left intact. A
/// `Conflict` aborts the current call without reissuing it.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl From<WireError> for Error {
    fn from(e: WireError) -> Self {
        let message = e.message.into_string();
        match e.kind {
            ErrorKind::InvalidArgument => Error::InvalidArgument(message),
            ErrorKind::NotFound => Error::NotFound(message),
            ErrorKind::AlreadyExists => Error::AlreadyExists(message),
            ErrorKind::Busy => Error::Busy(message),
            ErrorKind::PermissionDenied => Error::PermissionDenied(message),
            ErrorKind::Conflict => Error::Conflict(message),
            ErrorKind::Transport => Error::Protocol(message),
        }
    }
}

/// Client result type.
pub type Result<T> = std::result::Result<T, Error>;
