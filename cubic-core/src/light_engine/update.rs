//! Queued light updates and the order they are applied in.

use std::time::Instant;

use cubic_utils::{BlockPos, BlockStateId};

/// Scheduling class of a light update. Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LightPriority {
    /// Direct edits.
    Immediate,
    /// Bulk or deferred work.
    Background,
}

/// A block change waiting to be reflected in the light fields.
#[derive(Debug, Clone, Copy)]
pub struct LightUpdate {
    /// Where the block changed.
    pub pos: BlockPos,
    /// The state before the change.
    pub old_state: BlockStateId,
    /// The state after the change.
    pub new_state: BlockStateId,
    /// Emission of `new_state`.
    pub emission: u8,
    /// Scheduling class.
    pub priority: LightPriority,
    /// When the change was reported.
    pub timestamp: Instant,
}

impl LightUpdate {
    /// Sort key for batch processing: priority class, then age.
    #[must_use]
    pub fn order_key(&self) -> (LightPriority, Instant) {
        (self.priority, self.timestamp)
    }
}
