//! Metadata service request/response surface.

use binrw::prelude::*;

use crate::{PfsString, WireError};

/// Catalog entry for one file, as returned by a metadata fetch.
#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct FileMetadata {
    pub name: PfsString,
    /// Current file size in bytes; grows monotonically.
    pub size: u64,
    /// Creation time, unix seconds.
    pub ctime: i64,
    /// Last modification time, unix seconds; 0 until first write completes.
    pub mtime: i64,
    /// Number of storage nodes this file's blocks are striped over.
    pub stripe_width: u32,
}

/// Unary requests handled by the metadata service.
///
/// `OpenTokenStream` is special: it converts the connection it arrives on
/// into the client's long-lived token stream.
#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum MetaRequest {
    #[brw(magic = 1u8)]
    Ping,
    #[brw(magic = 2u8)]
    Initialize,
    #[brw(magic = 3u8)]
    Create { name: PfsString, stripe_width: u32 },
    #[brw(magic = 4u8)]
    Fetch { name: PfsString },
    #[brw(magic = 5u8)]
    Update {
        name: PfsString,
        size: u64,
        mtime: i64,
    },
    #[brw(magic = 6u8)]
    Delete { name: PfsString },
    #[brw(magic = 7u8)]
    Shutdown { client_id: u32 },
    #[brw(magic = 8u8)]
    OpenTokenStream { client_id: u32 },
}

/// Unary responses from the metadata service.
#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum MetaResponse {
    #[brw(magic = 1u8)]
    Pong,
    #[brw(magic = 2u8)]
    ClientId { client_id: u32 },
    #[brw(magic = 3u8)]
    Ok,
    #[brw(magic = 4u8)]
    Metadata { meta: FileMetadata },
    #[brw(magic = 0xffu8)]
    Error(WireError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::assert_wire;
    use crate::ErrorKind;

    #[test]
    fn test_create_request_encoding() {
        assert_wire!(
            MetaRequest::Create {
                name: "t".into(),
                stripe_width: 3,
            },
            MetaRequest,
            "03 0100 74 03000000"
        );
    }

    #[test]
    fn test_metadata_response_encoding() {
        assert_wire!(
            MetaResponse::Metadata {
                meta: FileMetadata {
                    name: "t".into(),
                    size: 33,
                    ctime: 0x0102,
                    mtime: 0,
                    stripe_width: 3,
                },
            },
            MetaResponse,
            "04 0100 74 2100000000000000 0201000000000000 0000000000000000 03000000"
        );
    }

    #[test]
    fn test_error_response_encoding() {
        assert_wire!(
            MetaResponse::Error(WireError::new(ErrorKind::NotFound, "no file")),
            MetaResponse,
            "ff 01 0700 6e6f2066696c65"
        );
    }
}
