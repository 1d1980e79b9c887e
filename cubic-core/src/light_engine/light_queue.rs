//! FIFO queue of pending light propagation steps.

use std::collections::VecDeque;

use cubic_utils::BlockPos;

use super::queue_entry::QueueEntry;

/// A FIFO of (position, entry) pairs.
///
/// Breadth-first order matters for increases: an entry is always processed
/// before entries it caused, so most stale entries get skipped cheaply.
#[derive(Debug, Default)]
pub struct LightQueue {
    entries: VecDeque<(BlockPos, QueueEntry)>,
}

impl LightQueue {
    /// Creates an empty queue sized for one cube worth of work.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(1024),
        }
    }

    /// Appends an entry.
    #[inline]
    pub fn enqueue(&mut self, pos: BlockPos, entry: QueueEntry) {
        self.entries.push_back((pos, entry));
    }

    /// Takes the oldest entry.
    #[inline]
    pub fn dequeue(&mut self) -> Option<(BlockPos, QueueEntry)> {
        self.entries.pop_front()
    }

    /// Whether nothing is queued.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of queued entries.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drops everything queued.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = LightQueue::new();
        let first = BlockPos::new(10, 64, 20);
        let second = BlockPos::new(11, 64, 20);
        queue.enqueue(first, QueueEntry::decrease_all_directions(5));
        queue.enqueue(second, QueueEntry::increase_from_source(14));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.dequeue().map(|(pos, _)| pos), Some(first));
        assert_eq!(queue.dequeue().map(|(pos, e)| (pos, e.level())), Some((second, 14)));
        assert!(queue.is_empty());
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_clear() {
        let mut queue = LightQueue::new();
        queue.enqueue(BlockPos::new(0, 0, 0), QueueEntry::decrease_all_directions(10));
        queue.clear();
        assert!(queue.is_empty());
    }
}
