//! Packed light propagation queue entries.
//!
//! A `QueueEntry` fits in a u16:
//!
//! ```text
//! bit:  15 ... 11 | 10     | 9 ........ 4 | 3 ... 0
//!       unused    | source | directions   | level
//! ```
//!
//! `source` marks an entry that injects light at its position (an emitting
//! block, or sky entering from outside) instead of re-spreading light that
//! is already stored there.

use super::direction::Direction;

/// Light level plus the directions it still has to travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry(u16);

impl QueueEntry {
    const LEVEL_MASK: u16 = 0x000F;
    const DIRECTION_SHIFT: u16 = 4;
    const ALL_DIRECTIONS: u16 = 0x3F << Self::DIRECTION_SHIFT;
    const SOURCE_FLAG: u16 = 1 << 10;

    #[inline]
    const fn direction_flag(dir: Direction) -> u16 {
        (dir.bit() as u16) << Self::DIRECTION_SHIFT
    }

    #[inline]
    fn packed(level: u8, directions: u16) -> Self {
        debug_assert!(level <= 15, "Light level must be 0-15");
        Self(directions | (u16::from(level) & Self::LEVEL_MASK))
    }

    /// The light level carried by the entry.
    #[must_use]
    #[inline]
    pub const fn level(self) -> u8 {
        (self.0 & Self::LEVEL_MASK) as u8
    }

    /// Whether the entry still travels in `dir`.
    #[must_use]
    #[inline]
    pub const fn should_propagate(self, dir: Direction) -> bool {
        self.0 & Self::direction_flag(dir) != 0
    }

    /// Whether the entry injects light rather than re-spreading stored light.
    #[must_use]
    #[inline]
    pub const fn is_source(self) -> bool {
        self.0 & Self::SOURCE_FLAG != 0
    }

    /// Removal spreading in every direction.
    #[must_use]
    pub fn decrease_all_directions(level: u8) -> Self {
        Self::packed(level, Self::ALL_DIRECTIONS)
    }

    /// Removal spreading everywhere except back where it came from.
    #[must_use]
    pub fn decrease_skip_one_direction(level: u8, skip: Direction) -> Self {
        Self::packed(level, Self::ALL_DIRECTIONS & !Self::direction_flag(skip))
    }

    /// Injects `level` at the position and spreads it everywhere.
    #[must_use]
    pub fn increase_from_source(level: u8) -> Self {
        Self::packed(level, Self::ALL_DIRECTIONS | Self::SOURCE_FLAG)
    }

    /// Re-spreads the stored level in every direction.
    #[must_use]
    pub fn increase_all_directions(level: u8) -> Self {
        Self::packed(level, Self::ALL_DIRECTIONS)
    }

    /// Spreads everywhere except back where it came from.
    #[must_use]
    pub fn increase_skip_one_direction(level: u8, skip: Direction) -> Self {
        Self::packed(level, Self::ALL_DIRECTIONS & !Self::direction_flag(skip))
    }

    /// Spreads only in `dir`, used to push light across a cube face.
    #[must_use]
    pub fn increase_only_one_direction(level: u8, dir: Direction) -> Self {
        Self::packed(level, Self::direction_flag(dir))
    }
}
