//! Storage node request/response surface.

use binrw::prelude::*;

use crate::{PfsString, WireError};

/// Requests handled by a storage node.
#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum NodeRequest {
    #[brw(magic = 1u8)]
    Ping,
    /// Read up to `size` bytes at `offset`. Short reads happen only at EOF.
    #[brw(magic = 2u8)]
    Read {
        name: PfsString,
        offset: u64,
        size: u32,
    },
    /// Write `data` at `offset`, creating the file and zero-filling any gap.
    #[brw(magic = 3u8)]
    Write {
        name: PfsString,
        offset: u64,
        #[bw(try_calc = data.len().try_into())]
        #[br(temp)]
        len: u32,
        #[br(count = len)]
        data: Vec<u8>,
    },
    /// Remove the backing file. Idempotent.
    #[brw(magic = 4u8)]
    Delete { name: PfsString },
}

/// Responses from a storage node.
#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum NodeResponse {
    #[brw(magic = 1u8)]
    Pong,
    #[brw(magic = 2u8)]
    Data {
        #[bw(try_calc = data.len().try_into())]
        #[br(temp)]
        len: u32,
        #[br(count = len)]
        data: Vec<u8>,
    },
    #[brw(magic = 3u8)]
    Written { count: u32 },
    #[brw(magic = 4u8)]
    Deleted,
    #[brw(magic = 0xffu8)]
    Error(WireError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::assert_wire;

    #[test]
    fn test_write_request_encoding() {
        assert_wire!(
            NodeRequest::Write {
                name: "f".into(),
                offset: 4096,
                data: b"AAAA".to_vec(),
            },
            NodeRequest,
            "03 0100 66 0010000000000000 04000000 41414141"
        );
    }

    #[test]
    fn test_data_response_encoding() {
        assert_wire!(
            NodeResponse::Data {
                data: b"bb".to_vec(),
            },
            NodeResponse,
            "02 02000000 6262"
        );
    }
}
