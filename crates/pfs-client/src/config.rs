//! Client configuration.

use std::time::Duration;

use pfs_transport::{ClusterList, DEFAULT_TIMEOUT};

/// Number of cached blocks when the config does not override it.
pub const DEFAULT_CACHE_BLOCKS: usize = 64;

/// Configuration for one client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Addresses of the metadata service and the storage nodes.
    pub cluster: ClusterList,
    /// Capacity of the block cache, in blocks.
    pub cache_blocks: usize,
    /// Connect deadline for every cluster connection.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(cluster: ClusterList) -> Self {
        ClientConfig {
            cluster,
            cache_blocks: DEFAULT_CACHE_BLOCKS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_cache_blocks(mut self, cache_blocks: usize) -> Self {
        self.cache_blocks = cache_blocks;
        self
    }
}
