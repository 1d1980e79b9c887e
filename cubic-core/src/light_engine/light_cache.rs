//! Short lived cache of combined light queries.

use std::time::{Duration, Instant};

use cubic_utils::{BlockPos, CubeCoord};

use super::direction::Direction;

#[derive(Debug, Clone, Copy)]
struct CachedLight {
    level: u8,
    /// Version of the owning cube when the value was read.
    version: u64,
    stored_at: Instant,
}

/// Combined light values keyed by position.
///
/// An entry is only served while it is younger than the TTL and the owning
/// cube hasn't changed since it was stored.
#[derive(Debug)]
pub struct LightCache {
    entries: scc::HashMap<BlockPos, CachedLight>,
    ttl: Duration,
}

impl LightCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: scc::HashMap::new(),
            ttl,
        }
    }

    /// Returns the cached value if it is still valid for `version`.
    #[must_use]
    pub fn get(&self, pos: BlockPos, version: u64) -> Option<u8> {
        self.entries
            .read_sync(&pos, |_, cached| {
                (cached.version == version && cached.stored_at.elapsed() < self.ttl)
                    .then_some(cached.level)
            })
            .flatten()
    }

    /// Stores a freshly read value.
    pub fn insert(&self, pos: BlockPos, level: u8, version: u64) {
        let cached = CachedLight {
            level,
            version,
            stored_at: Instant::now(),
        };
        if let Err((pos, cached)) = self.entries.insert_sync(pos, cached) {
            self.entries.update_sync(&pos, |_, entry| *entry = cached);
        }
    }

    /// Drops `pos` and its six neighbors.
    pub fn invalidate(&self, pos: BlockPos) {
        self.entries.remove_sync(&pos);
        for dir in Direction::ALL {
            self.entries.remove_sync(&dir.relative(pos));
        }
    }

    /// Drops every entry inside the cube at `coord`.
    pub fn forget_cube(&self, coord: CubeCoord) {
        self.entries.retain_sync(|pos, _| pos.cube_coord() != coord);
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain_sync(|_, cached| cached.stored_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops everything.
    pub fn clear(&self) {
        self.entries.clear_sync();
    }
}
