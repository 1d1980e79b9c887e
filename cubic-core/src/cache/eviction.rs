//! Access recency and the unload queue.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

use cubic_utils::CubeCoord;
use rustc_hash::FxHashSet;

/// When and how often a resident cube was last asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessInfo {
    /// Logical time of the most recent access.
    pub last_access: u64,
    /// Accesses since the cube became resident.
    pub count: u64,
}

/// Access metadata for resident cubes.
///
/// Time is a logical clock bumped on every access, so two accesses never
/// share a stamp and eviction order is total.
#[derive(Debug, Default)]
pub struct AccessTracker {
    clock: AtomicU64,
    entries: scc::HashMap<CubeCoord, AccessInfo>,
}

impl AccessTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an access and returns its stamp.
    pub fn touch(&self, coord: CubeCoord) -> u64 {
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        let updated = self.entries.update_sync(&coord, |_, info| {
            info.last_access = stamp;
            info.count += 1;
        });
        if updated.is_none() {
            let info = AccessInfo {
                last_access: stamp,
                count: 1,
            };
            if let Err((_, info)) = self.entries.insert_sync(coord, info) {
                // Raced with another first access.
                self.entries.update_sync(&coord, |_, existing| {
                    existing.last_access = existing.last_access.max(info.last_access);
                    existing.count += 1;
                });
            }
        }
        stamp
    }

    /// Access metadata of `coord`.
    #[must_use]
    pub fn get(&self, coord: CubeCoord) -> Option<AccessInfo> {
        self.entries.read_sync(&coord, |_, info| *info)
    }

    /// Forgets `coord`.
    pub fn remove(&self, coord: CubeCoord) {
        self.entries.remove_sync(&coord);
    }

    /// Every tracked coordinate, least recently used first.
    #[must_use]
    pub fn least_recent(&self) -> Vec<(u64, CubeCoord)> {
        let mut entries = Vec::with_capacity(self.entries.len());
        self.entries.iter_sync(|coord, info| {
            entries.push((info.last_access, *coord));
            true
        });
        entries.sort_unstable_by_key(|(stamp, _)| *stamp);
        entries
    }

    /// Number of tracked coordinates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets everything.
    pub fn clear(&self) {
        self.entries.clear_sync();
    }
}

/// Why a cube was queued for unload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadReason {
    /// Picked by the eviction pass; `stamp` is its last access when picked.
    Evicted {
        /// Access stamp at selection time.
        stamp: u64,
    },
    /// Asked for explicitly.
    Requested,
}

/// One queued unload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnloadEntry {
    /// The cube to unload.
    pub coord: CubeCoord,
    /// Why it was queued.
    pub reason: UnloadReason,
}

/// Cubes waiting to be unloaded, in the order they were picked.
#[derive(Debug, Default)]
pub struct UnloadQueue {
    entries: VecDeque<UnloadEntry>,
    queued: FxHashSet<CubeCoord>,
}

impl UnloadQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry. Returns false if `coord` is already queued.
    pub fn push(&mut self, coord: CubeCoord, reason: UnloadReason) -> bool {
        if !self.queued.insert(coord) {
            return false;
        }
        self.entries.push_back(UnloadEntry { coord, reason });
        true
    }

    /// Takes the oldest entry.
    pub fn pop(&mut self) -> Option<UnloadEntry> {
        let entry = self.entries.pop_front()?;
        self.queued.remove(&entry.coord);
        Some(entry)
    }

    /// Whether `coord` is queued.
    #[must_use]
    pub fn contains(&self, coord: CubeCoord) -> bool {
        self.queued.contains(&coord)
    }

    /// Queued coordinates, oldest first.
    pub fn coords(&self) -> impl Iterator<Item = CubeCoord> + '_ {
        self.entries.iter().map(|entry| entry.coord)
    }

    /// Queued entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &UnloadEntry> + '_ {
        self.entries.iter()
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.queued.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_orders_by_recency() {
        let tracker = AccessTracker::new();
        let a = CubeCoord::new(0, 0, 0);
        let b = CubeCoord::new(1, 0, 0);
        let c = CubeCoord::new(2, 0, 0);
        tracker.touch(a);
        tracker.touch(b);
        tracker.touch(c);
        tracker.touch(a);

        let order: Vec<_> = tracker.least_recent().into_iter().map(|(_, c)| c).collect();
        assert_eq!(order, vec![b, c, a]);
        assert_eq!(tracker.get(a).map(|info| info.count), Some(2));

        tracker.remove(b);
        assert_eq!(tracker.len(), 2);
        assert!(tracker.get(b).is_none());
    }

    #[test]
    fn test_unload_queue_dedupes() {
        let mut queue = UnloadQueue::new();
        let a = CubeCoord::new(0, 0, 0);
        assert!(queue.push(a, UnloadReason::Requested));
        assert!(!queue.push(a, UnloadReason::Evicted { stamp: 3 }));
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.pop(),
            Some(UnloadEntry {
                coord: a,
                reason: UnloadReason::Requested
            })
        );
        assert!(!queue.contains(a));
        assert!(queue.push(a, UnloadReason::Requested));
    }
}
