//! Cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, bumped from any thread.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub joined: AtomicU64,
    pub generated: AtomicU64,
    pub loaded: AtomicU64,
    pub revived: AtomicU64,
    pub evicted: AtomicU64,
    pub failed_loads: AtomicU64,
    pub saved: AtomicU64,
    pub failed_saves: AtomicU64,
    pub dropped: AtomicU64,
}

impl CacheCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStats {
            hits: read(&self.hits),
            misses: read(&self.misses),
            joined: read(&self.joined),
            generated: read(&self.generated),
            loaded: read(&self.loaded),
            revived: read(&self.revived),
            evicted: read(&self.evicted),
            failed_loads: read(&self.failed_loads),
            saved: read(&self.saved),
            failed_saves: read(&self.failed_saves),
            dropped: read(&self.dropped),
            ..CacheStats::default()
        }
    }
}

/// A point in time view of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered from resident cubes.
    pub hits: u64,
    /// Requests that started a load.
    pub misses: u64,
    /// Requests that joined a load already in flight.
    pub joined: u64,
    /// Cubes produced by the generator.
    pub generated: u64,
    /// Cubes read back from storage.
    pub loaded: u64,
    /// Evicted cubes brought back before their save finished.
    pub revived: u64,
    /// Cubes removed from the resident set.
    pub evicted: u64,
    /// Loads that completed with an error.
    pub failed_loads: u64,
    /// Successful saves.
    pub saved: u64,
    /// Failed save attempts.
    pub failed_saves: u64,
    /// Dirty cubes given up on after repeated save failures.
    pub dropped: u64,
    /// Cubes currently resident.
    pub resident: usize,
    /// Loads currently running.
    pub in_flight: usize,
    /// Evicted cubes still waiting for a successful save.
    pub unloading: usize,
    /// Loads waiting for a tick.
    pub queued_loads: usize,
    /// Unloads waiting for a tick.
    pub queued_unloads: usize,
}

/// What one [`tick`](super::CubeCache::tick) did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Queued loads started.
    pub loads_dispatched: usize,
    /// Cubes newly queued for eviction.
    pub unloads_queued: usize,
    /// Cubes removed from the resident set.
    pub unloaded: usize,
    /// Light updates handed from the pending queue to the light pool.
    pub light_updates: usize,
}
