//! Wire messages and shared data model for the PFS protocol.
//!
//! All messages are little-endian [`binrw`] structures. The transport layer
//! (`pfs-transport`) frames each message with a magic + length header; this
//! crate only describes payloads and the few constants every role agrees on.

#![forbid(unsafe_code)]

pub mod error;
pub mod meta;
pub mod node;
pub mod string;
pub mod token;

pub use error::{ErrorKind, WireError};
pub use meta::{FileMetadata, MetaRequest, MetaResponse};
pub use node::{NodeRequest, NodeResponse};
pub use string::PfsString;
pub use token::{TokenAction, TokenMode, TokenOp, TokenRequest, TokenResponse};

/// Size of one file block, the unit of caching, striping and storage I/O.
pub const BLOCK_SIZE: u64 = 4096;

/// Upper bound on the number of storage nodes a cluster may name.
pub const MAX_STORAGE_NODES: usize = 16;

/// Index of the block containing `offset`.
pub const fn block_index(offset: u64) -> u64 {
    offset / BLOCK_SIZE
}

/// Inclusive byte range covered by block `index`.
pub const fn block_range(index: u64) -> (u64, u64) {
    let start = index * BLOCK_SIZE;
    (start, start + BLOCK_SIZE - 1)
}

/// The stripe recipe: block `index` of a file lives on storage node
/// `index mod stripe_width`.
pub const fn node_for_block(index: u64, stripe_width: u32) -> usize {
    (index % stripe_width as u64) as usize
}

#[cfg(test)]
pub(crate) mod test_util {
    /// Decodes a hex string (whitespace allowed) into bytes.
    pub fn hex(s: &str) -> Vec<u8> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        assert!(compact.len() % 2 == 0, "odd hex length");
        (0..compact.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&compact[i..i + 2], 16).expect("bad hex"))
            .collect()
    }

    /// Round-trips `value` through its binrw encoding and asserts the hex.
    macro_rules! assert_wire {
        ($value:expr, $ty:ty, $hex:expr) => {{
            use ::binrw::{BinRead, BinWrite};
            let value: $ty = $value;
            let mut cursor = ::std::io::Cursor::new(Vec::new());
            value.write_le(&mut cursor).unwrap();
            let written = cursor.into_inner();
            assert_eq!(written, $crate::test_util::hex($hex), "encode mismatch");
            let read = <$ty>::read_le(&mut ::std::io::Cursor::new(&written)).unwrap();
            assert_eq!(read, value, "decode mismatch");
        }};
    }

    pub(crate) use assert_wire;
}
