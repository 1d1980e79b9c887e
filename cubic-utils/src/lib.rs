//! # Cubic utils
//!
//! Shared value types for the cube world: coordinates, block state handles,
//! small vector math and lock aliases.

pub mod locks;
pub mod math;
mod types;

pub use types::{
    BlockPos, BlockStateId, CUBE_SIZE, CUBE_SIZE_BITS, CUBE_VOLUME, ColumnPos, CubeCoord, LocalPos,
};
