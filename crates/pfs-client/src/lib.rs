//! PFS client library.
//!
//! The coherence agent behind the file API: it mirrors the byte-range
//! tokens granted by the metadata service, keeps a bounded write-back
//! block cache, and talks to the storage nodes for misses and flushes.

#![forbid(unsafe_code)]

mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod stats;
mod tokens;

pub use client::{Client, OpenMode};
pub use config::{ClientConfig, DEFAULT_CACHE_BLOCKS};
pub use error::{Error, Result};
pub use stats::ExecStats;

pub use pfs_msg::{FileMetadata, BLOCK_SIZE};
pub use pfs_transport::ClusterList;
