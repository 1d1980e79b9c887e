//! Block state storage for a cube.

use std::mem;

use cubic_utils::{BlockStateId, CUBE_VOLUME, LocalPos};

/// Block states of a cube.
///
/// Freshly created cubes are a single state; the first differing write
/// expands the storage to one id per voxel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStorage {
    /// Every voxel holds the same state.
    Homogeneous(BlockStateId),
    /// One state per voxel, indexed by [`LocalPos::index`].
    Heterogeneous(Box<[BlockStateId; CUBE_VOLUME]>),
}

impl BlockStorage {
    /// Gets the state at `pos`.
    #[must_use]
    #[inline]
    pub fn get(&self, pos: LocalPos) -> BlockStateId {
        match self {
            Self::Homogeneous(state) => *state,
            Self::Heterogeneous(states) => states[pos.index()],
        }
    }

    /// Sets the state at `pos`, returning the previous one.
    pub fn set(&mut self, pos: LocalPos, state: BlockStateId) -> BlockStateId {
        match self {
            Self::Homogeneous(current) => {
                let old = *current;
                if old != state {
                    let mut states = Box::new([old; CUBE_VOLUME]);
                    states[pos.index()] = state;
                    *self = Self::Heterogeneous(states);
                }
                old
            }
            Self::Heterogeneous(states) => mem::replace(&mut states[pos.index()], state),
        }
    }

    /// Fills the whole cube with one state.
    pub fn fill(&mut self, state: BlockStateId) {
        *self = Self::Homogeneous(state);
    }

    /// Returns the single state if the cube is uniform.
    #[must_use]
    pub fn uniform_state(&self) -> Option<BlockStateId> {
        match self {
            Self::Homogeneous(state) => Some(*state),
            Self::Heterogeneous(states) => {
                let first = states[0];
                states.iter().all(|s| *s == first).then_some(first)
            }
        }
    }
}

impl Default for BlockStorage {
    fn default() -> Self {
        Self::Homogeneous(BlockStateId::AIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_expands() {
        let mut storage = BlockStorage::default();
        let pos = LocalPos::new(1, 2, 3);
        assert_eq!(storage.set(pos, BlockStateId(5)), BlockStateId::AIR);
        assert_eq!(storage.get(pos), BlockStateId(5));
        assert_eq!(storage.get(LocalPos::new(0, 0, 0)), BlockStateId::AIR);
        assert_eq!(storage.uniform_state(), None);
    }

    #[test]
    fn test_same_state_stays_homogeneous() {
        let mut storage = BlockStorage::Homogeneous(BlockStateId(2));
        storage.set(LocalPos::new(0, 0, 0), BlockStateId(2));
        assert_eq!(storage, BlockStorage::Homogeneous(BlockStateId(2)));
    }
}
