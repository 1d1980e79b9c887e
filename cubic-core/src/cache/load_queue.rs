//! Prioritised queue of pending cube loads.

use std::{cmp::Ordering, collections::BinaryHeap};

use cubic_utils::CubeCoord;
use rustc_hash::FxHashMap;
use uuid::Uuid;

/// One queued load.
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest {
    /// The cube to load.
    pub coord: CubeCoord,
    /// Squared distance to the requester, `i64::MAX` when unknown.
    pub distance: i64,
    /// Who asked for it.
    pub requester: Option<Uuid>,
    /// Insertion order.
    pub sequence: u64,
}

impl PartialEq for LoadRequest {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.sequence == other.sequence
    }
}

impl Eq for LoadRequest {}

impl PartialOrd for LoadRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LoadRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: nearest first, then most recent first.
        other
            .distance
            .cmp(&self.distance)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

/// Loads waiting for a tick, nearest to their requester first.
///
/// Requeueing a coordinate replaces its earlier request; the stale heap entry
/// is skipped when it surfaces.
#[derive(Debug, Default)]
pub struct LoadQueue {
    pending: BinaryHeap<LoadRequest>,
    /// Live sequence number per queued coordinate.
    queued: FxHashMap<CubeCoord, u64>,
    next_sequence: u64,
}

impl LoadQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a load. Returns false if `coord` was already queued.
    pub fn push(&mut self, coord: CubeCoord, distance: i64, requester: Option<Uuid>) -> bool {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let fresh = self.queued.insert(coord, sequence).is_none();
        self.pending.push(LoadRequest {
            coord,
            distance,
            requester,
            sequence,
        });
        fresh
    }

    /// Takes the highest priority request.
    pub fn pop(&mut self) -> Option<LoadRequest> {
        while let Some(request) = self.pending.pop() {
            if self.queued.get(&request.coord) == Some(&request.sequence) {
                self.queued.remove(&request.coord);
                return Some(request);
            }
        }
        None
    }

    /// Drops a queued request.
    pub fn remove(&mut self, coord: CubeCoord) -> bool {
        self.queued.remove(&coord).is_some()
    }

    /// Whether `coord` is queued.
    #[must_use]
    pub fn contains(&self, coord: CubeCoord) -> bool {
        self.queued.contains_key(&coord)
    }

    /// Number of queued coordinates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.queued.clear();
    }
}
