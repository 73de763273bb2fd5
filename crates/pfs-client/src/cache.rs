//! LRU block cache.

use std::num::NonZeroUsize;

use lru::LruCache;
use pfs_msg::{block_range, TokenMode, BLOCK_SIZE};

/// Cache key: one block of one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct BlockKey {
    pub name: String,
    pub index: u64,
}

impl BlockKey {
    pub fn new(name: &str, index: u64) -> Self {
        BlockKey {
            name: name.to_string(),
            index,
        }
    }

    /// Inclusive byte range this block covers.
    pub fn byte_range(&self) -> (u64, u64) {
        block_range(self.index)
    }
}

/// One cached block. `data` is always exactly [`BLOCK_SIZE`] bytes; the
/// region past EOF is zero-filled.
pub(crate) struct CacheBlock {
    pub data: Vec<u8>,
    pub dirty: bool,
    pub mode: TokenMode,
}

impl CacheBlock {
    pub fn clean(mut data: Vec<u8>, mode: TokenMode) -> Self {
        data.resize(BLOCK_SIZE as usize, 0);
        CacheBlock {
            data,
            dirty: false,
            mode,
        }
    }
}

/// Bounded LRU over cached blocks. The cache itself never performs I/O:
/// admission returns the displaced block so the caller can write it back
/// before anything else observes the eviction.
pub(crate) struct BlockCache {
    blocks: LruCache<BlockKey, CacheBlock>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        BlockCache {
            blocks: LruCache::new(capacity),
        }
    }

    /// Looks a block up, marking it most-recently used.
    pub fn get_mut(&mut self, key: &BlockKey) -> Option<&mut CacheBlock> {
        self.blocks.get_mut(key)
    }

    /// Inserts a block, returning the LRU victim if the cache was full.
    pub fn admit(&mut self, key: BlockKey, block: CacheBlock) -> Option<(BlockKey, CacheBlock)> {
        if self.blocks.contains(&key) {
            self.blocks.put(key, block);
            return None;
        }
        let victim = if self.blocks.len() == self.blocks.cap().get() {
            self.blocks.pop_lru()
        } else {
            None
        };
        self.blocks.put(key, block);
        victim
    }

    /// Removes and returns every block of `name` whose byte range
    /// intersects `[start, end]`.
    pub fn take_range(&mut self, name: &str, start: u64, end: u64) -> Vec<(BlockKey, CacheBlock)> {
        let keys: Vec<BlockKey> = self
            .blocks
            .iter()
            .filter(|(key, _)| {
                let (block_start, block_end) = key.byte_range();
                key.name == name && block_end >= start && block_start <= end
            })
            .map(|(key, _)| key.clone())
            .collect();

        keys.into_iter()
            .filter_map(|key| self.blocks.pop(&key).map(|block| (key, block)))
            .collect()
    }

    /// Removes and returns every block of `name`.
    pub fn take_file(&mut self, name: &str) -> Vec<(BlockKey, CacheBlock)> {
        self.take_range(name, 0, u64::MAX)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }
}
