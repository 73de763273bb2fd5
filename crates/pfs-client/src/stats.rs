//! Cache activity counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the coherence agent. `execstat` takes a
/// snapshot without any lock.
#[derive(Default)]
pub(crate) struct Counters {
    pub read_hits: AtomicU64,
    pub write_hits: AtomicU64,
    pub evictions: AtomicU64,
    pub writebacks: AtomicU64,
    pub invalidations: AtomicU64,
    pub close_writebacks: AtomicU64,
    pub close_evictions: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> ExecStats {
        ExecStats {
            read_hits: self.read_hits.load(Ordering::Relaxed),
            write_hits: self.write_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            writebacks: self.writebacks.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            close_writebacks: self.close_writebacks.load(Ordering::Relaxed),
            close_evictions: self.close_evictions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of the seven cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecStats {
    /// Reads served from a cached block.
    pub read_hits: u64,
    /// Writes applied to an already-cached block.
    pub write_hits: u64,
    /// Blocks pushed out by LRU admission.
    pub evictions: u64,
    /// Dirty blocks flushed on eviction or revocation.
    pub writebacks: u64,
    /// Blocks dropped by a revocation.
    pub invalidations: u64,
    /// Dirty blocks flushed while closing a file.
    pub close_writebacks: u64,
    /// Blocks dropped while closing a file.
    pub close_evictions: u64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}
