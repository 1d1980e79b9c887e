// Wrapper types making it harder to accidentaly mix up block-space and cube-space coordinates.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::math::Vector3;

/// Number of bits in a cube edge.
pub const CUBE_SIZE_BITS: i32 = 4;
/// Edge length of a cube in blocks.
pub const CUBE_SIZE: usize = 1 << CUBE_SIZE_BITS;
/// Number of voxels in a cube.
pub const CUBE_VOLUME: usize = CUBE_SIZE * CUBE_SIZE * CUBE_SIZE;

const LOCAL_MASK: i32 = (1 << CUBE_SIZE_BITS) - 1;

// A raw block state id. What it means is decided by whoever implements the block capability interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockStateId(pub u16);

impl BlockStateId {
    /// The conventional air state.
    pub const AIR: Self = Self(0);
}

// A cube position in cube-space (block coordinate >> 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CubeCoord(pub Vector3<i32>);

// A block position in world space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockPos(pub Vector3<i32>);

// A column of cubes sharing x and z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ColumnPos {
    /// Cube-space x.
    pub x: i32,
    /// Cube-space z.
    pub z: i32,
}

/// A voxel position inside a cube, each axis in `0..16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LocalPos {
    /// X inside the cube.
    pub x: usize,
    /// Y inside the cube.
    pub y: usize,
    /// Z inside the cube.
    pub z: usize,
}

impl CubeCoord {
    /// Creates a cube coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self(Vector3::new(x, y, z))
    }

    /// The block position of this cube's minimum corner.
    #[must_use]
    pub fn origin(self) -> BlockPos {
        BlockPos(Vector3::new(
            self.0.x << CUBE_SIZE_BITS,
            self.0.y << CUBE_SIZE_BITS,
            self.0.z << CUBE_SIZE_BITS,
        ))
    }

    /// The column this cube belongs to.
    #[must_use]
    pub const fn column(self) -> ColumnPos {
        ColumnPos {
            x: self.0.x,
            z: self.0.z,
        }
    }

    /// Returns the coordinate offset by the given amounts.
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.0.x + dx, self.0.y + dy, self.0.z + dz)
    }

    /// Chebyshev distance in cube-space.
    #[must_use]
    pub fn chebyshev_distance(self, other: Self) -> i32 {
        self.0.chebyshev_distance(other.0)
    }

    /// Squared euclidean distance in cube-space.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> i64 {
        (self.0 - other.0).length_squared()
    }

    /// Converts a local position inside this cube into a world position.
    #[must_use]
    pub fn block_at(self, local: LocalPos) -> BlockPos {
        let origin = self.origin();
        BlockPos(Vector3::new(
            origin.0.x + local.x as i32,
            origin.0.y + local.y as i32,
            origin.0.z + local.z as i32,
        ))
    }
}

impl Display for CubeCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.0.x, self.0.y, self.0.z)
    }
}

impl BlockPos {
    /// Creates a block position.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self(Vector3::new(x, y, z))
    }

    /// The cube containing this block (floor division by the cube size).
    #[must_use]
    pub const fn cube_coord(self) -> CubeCoord {
        CubeCoord::new(
            self.0.x >> CUBE_SIZE_BITS,
            self.0.y >> CUBE_SIZE_BITS,
            self.0.z >> CUBE_SIZE_BITS,
        )
    }

    /// The position of this block inside its cube.
    #[must_use]
    pub const fn local(self) -> LocalPos {
        LocalPos {
            x: (self.0.x & LOCAL_MASK) as usize,
            y: (self.0.y & LOCAL_MASK) as usize,
            z: (self.0.z & LOCAL_MASK) as usize,
        }
    }

    /// Returns the position offset by the given amounts.
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.0.x + dx, self.0.y + dy, self.0.z + dz)
    }
}

impl Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.0.x, self.0.y, self.0.z)
    }
}

impl LocalPos {
    /// Creates a local position.
    #[must_use]
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        debug_assert!(x < CUBE_SIZE && y < CUBE_SIZE && z < CUBE_SIZE);
        Self { x, y, z }
    }

    /// Index into a dense cube array, y-major then z then x.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        (self.y << 8) | (self.z << 4) | self.x
    }

    /// Inverse of [`LocalPos::index`].
    #[must_use]
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        Self {
            x: index & 15,
            y: (index >> 8) & 15,
            z: (index >> 4) & 15,
        }
    }

    /// Iterates every local position of a cube in index order.
    pub fn all() -> impl Iterator<Item = LocalPos> {
        (0..CUBE_VOLUME).map(Self::from_index)
    }
}
