//! Token stream messages.
//!
//! A client keeps exactly one long-lived token stream open to the metadata
//! service. Four logical message kinds are multiplexed over it by the
//! `op`/`action` discriminants: token requests and close/ack traffic flow
//! client-to-server as [`TokenRequest`], grants and revocations flow
//! server-to-client as [`TokenResponse`].

use binrw::prelude::*;

use crate::PfsString;

/// Access mode of a byte-range token.
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[brw(repr(u8))]
pub enum TokenMode {
    Read = 1,
    Write = 2,
}

impl TokenMode {
    /// Whether a token of mode `self` may not coexist with one of `other`
    /// over the same bytes. Only READ/READ overlaps are allowed.
    pub fn conflicts_with(self, other: TokenMode) -> bool {
        self == TokenMode::Write || other == TokenMode::Write
    }
}

impl std::fmt::Display for TokenMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenMode::Read => write!(f, "READ"),
            TokenMode::Write => write!(f, "WRITE"),
        }
    }
}

/// Operation selector on a client-to-server stream message.
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u8))]
pub enum TokenOp {
    /// Acquire a READ token for `[start, end]`.
    Read = 1,
    /// Acquire a WRITE token for `[start, end]`.
    Write = 2,
    /// Drop every token this client holds on the file.
    Close = 3,
    /// Acknowledge a revocation of `[start, end]`.
    Ack = 4,
}

/// Action selector on a server-to-client stream message.
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u8))]
pub enum TokenAction {
    /// The requested range has been granted.
    Grant = 1,
    /// The client must relinquish `[start, end]` and acknowledge.
    Revoke = 2,
    /// A CLOSE request has been processed.
    Ack = 3,
}

/// Client-to-server token stream message.
#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TokenRequest {
    pub client_id: u32,
    pub fd: u32,
    pub name: PfsString,
    pub op: TokenOp,
    /// First byte of the range; unused for CLOSE.
    pub start: u64,
    /// Last byte of the range, inclusive; unused for CLOSE.
    pub end: u64,
}

impl TokenRequest {
    pub fn acquire(
        client_id: u32,
        fd: u32,
        name: &str,
        mode: TokenMode,
        start: u64,
        end: u64,
    ) -> Self {
        TokenRequest {
            client_id,
            fd,
            name: name.into(),
            op: match mode {
                TokenMode::Read => TokenOp::Read,
                TokenMode::Write => TokenOp::Write,
            },
            start,
            end,
        }
    }

    pub fn close(client_id: u32, fd: u32, name: &str) -> Self {
        TokenRequest {
            client_id,
            fd,
            name: name.into(),
            op: TokenOp::Close,
            start: 0,
            end: 0,
        }
    }

    pub fn ack(client_id: u32, name: &str, start: u64, end: u64) -> Self {
        TokenRequest {
            client_id,
            fd: 0,
            name: name.into(),
            op: TokenOp::Ack,
            start,
            end,
        }
    }
}

/// Server-to-client token stream message.
#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TokenResponse {
    pub client_id: u32,
    pub name: PfsString,
    pub action: TokenAction,
    /// Mode of the granted or revoked range.
    pub mode: TokenMode,
    pub start: u64,
    pub end: u64,
}

impl TokenResponse {
    pub fn grant(client_id: u32, name: &str, mode: TokenMode, start: u64, end: u64) -> Self {
        TokenResponse {
            client_id,
            name: name.into(),
            action: TokenAction::Grant,
            mode,
            start,
            end,
        }
    }

    pub fn revoke(client_id: u32, name: &str, mode: TokenMode, start: u64, end: u64) -> Self {
        TokenResponse {
            client_id,
            name: name.into(),
            action: TokenAction::Revoke,
            mode,
            start,
            end,
        }
    }

    pub fn close_ack(client_id: u32, name: &str) -> Self {
        TokenResponse {
            client_id,
            name: name.into(),
            action: TokenAction::Ack,
            mode: TokenMode::Read,
            start: 0,
            end: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::assert_wire;

    #[test]
    fn test_token_request_encoding() {
        assert_wire!(
            TokenRequest::acquire(1, 3, "f", TokenMode::Write, 0, 99),
            TokenRequest,
            "01000000 03000000 0100 66 02 0000000000000000 6300000000000000"
        );
    }

    #[test]
    fn test_token_revoke_encoding() {
        assert_wire!(
            TokenResponse::revoke(2, "f", TokenMode::Write, 50, 99),
            TokenResponse,
            "02000000 0100 66 02 02 3200000000000000 6300000000000000"
        );
    }

    #[test]
    fn test_read_read_is_not_a_conflict() {
        assert!(!TokenMode::Read.conflicts_with(TokenMode::Read));
        assert!(TokenMode::Read.conflicts_with(TokenMode::Write));
        assert!(TokenMode::Write.conflicts_with(TokenMode::Read));
        assert!(TokenMode::Write.conflicts_with(TokenMode::Write));
    }
}
