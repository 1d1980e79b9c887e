//! Light storage for a cube.
//!
//! Light values are stored as 4-bit values (0-15), packed as two values per byte.
//! For a 16x16x16 cube, this requires 2048 bytes (4096 voxels / 2).

use cubic_utils::{CUBE_VOLUME, LocalPos};

/// The number of bytes needed to store light data for a 16x16x16 cube.
pub const LIGHT_ARRAY_SIZE: usize = CUBE_VOLUME / 2;

/// Storage for one light field of a cube.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LightStorage {
    /// Every voxel has the same level.
    Homogeneous(u8),
    /// Voxels differ, stored as packed nibbles (low nibble = even index).
    Heterogeneous(Box<[u8; LIGHT_ARRAY_SIZE]>),
}

#[inline]
fn packed(level: u8) -> u8 {
    (level & 0x0F) | ((level & 0x0F) << 4)
}

impl LightStorage {
    /// Creates storage with every voxel at `level`.
    #[must_use]
    pub fn new_filled(level: u8) -> Self {
        debug_assert!(level <= 15, "Light level must be 0-15");
        Self::Homogeneous(level)
    }

    /// Creates dark storage.
    #[must_use]
    pub fn new_empty() -> Self {
        Self::Homogeneous(0)
    }

    /// Gets the level at `pos`.
    #[must_use]
    #[inline]
    pub fn get(&self, pos: LocalPos) -> u8 {
        match self {
            Self::Homogeneous(level) => *level,
            Self::Heterogeneous(data) => {
                let index = pos.index();
                let byte = data[index >> 1];
                if index & 1 == 1 { byte >> 4 } else { byte & 0x0F }
            }
        }
    }

    /// Sets the level at `pos`, upgrading to heterogeneous storage when needed.
    ///
    /// Returns true if the stored value changed.
    #[inline]
    pub fn set(&mut self, pos: LocalPos, level: u8) -> bool {
        debug_assert!(level <= 15, "Light level must be 0-15");

        if let Self::Homogeneous(current) = *self {
            if current == level {
                return false;
            }
            *self = Self::Heterogeneous(Box::new([packed(current); LIGHT_ARRAY_SIZE]));
        }

        let Self::Heterogeneous(data) = self else {
            unreachable!("upgraded above");
        };
        let index = pos.index();
        let byte = &mut data[index >> 1];
        let old = if index & 1 == 1 { *byte >> 4 } else { *byte & 0x0F };
        if old == level {
            return false;
        }
        if index & 1 == 1 {
            *byte = (*byte & 0x0F) | (level << 4);
        } else {
            *byte = (*byte & 0xF0) | level;
        }
        true
    }

    /// Stores `level` only if it is brighter than the current value.
    #[inline]
    pub fn raise(&mut self, pos: LocalPos, level: u8) -> bool {
        if level > self.get(pos) {
            self.set(pos, level)
        } else {
            false
        }
    }

    /// Overwrites every voxel with `level`.
    pub fn fill(&mut self, level: u8) {
        debug_assert!(level <= 15, "Light level must be 0-15");
        *self = Self::Homogeneous(level);
    }

    /// Whether every voxel holds `level`.
    #[must_use]
    pub fn is_uniform(&self, level: u8) -> bool {
        match self {
            Self::Homogeneous(current) => *current == level,
            Self::Heterogeneous(data) => data.iter().all(|byte| *byte == packed(level)),
        }
    }

    /// Collapses heterogeneous storage back to homogeneous if all voxels match.
    pub fn compact(&mut self) {
        if let Self::Heterogeneous(data) = self {
            let first = data[0] & 0x0F;
            if data.iter().all(|byte| *byte == packed(first)) {
                *self = Self::Homogeneous(first);
            }
        }
    }

    /// Whether both storages hold the same level in every voxel.
    #[must_use]
    pub fn same_levels(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Homogeneous(a), Self::Homogeneous(b)) => a == b,
            (Self::Heterogeneous(a), Self::Heterogeneous(b)) => a == b,
            _ => LocalPos::all().all(|pos| self.get(pos) == other.get(pos)),
        }
    }
}

impl Default for LightStorage {
    fn default() -> Self {
        Self::new_empty()
    }
}
