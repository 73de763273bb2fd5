//! Wire-level error kinds shared by every PFS surface.

use binrw::prelude::*;

use crate::PfsString;

/// Classification of a failed operation, carried inside [`WireError`].
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u8))]
pub enum ErrorKind {
    /// Bad name, bad mode, bad stripe width, zero-size buffer.
    InvalidArgument = 0,
    /// Unknown file or file descriptor.
    NotFound = 1,
    /// Create of an existing name.
    AlreadyExists = 2,
    /// Delete of a file with live tokens.
    Busy = 3,
    /// Write on a read-only descriptor.
    PermissionDenied = 4,
    /// RPC failure.
    Transport = 5,
    /// A revocation forced the current operation to abort.
    Conflict = 6,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::Busy => "busy",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Transport => "transport",
            ErrorKind::Conflict => "conflict",
        };
        write!(f, "{name}")
    }
}

/// An error response payload: a kind plus a short diagnostic message.
#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: PfsString,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        WireError {
            kind,
            message: message.into().into(),
        }
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::assert_wire;

    #[test]
    fn test_wire_error_encoding() {
        assert_wire!(
            WireError::new(ErrorKind::Busy, "locked"),
            WireError,
            "03 0600 6c6f636b6564"
        );
    }
}
