//! This module contains the `CubeGenerator` trait, which is used to populate cubes.

mod empty;
mod flat;

pub use empty::EmptyGenerator;
pub use flat::FlatGenerator;

use crate::cube::Cube;

/// Fills freshly created cubes with block content.
///
/// `populate` runs on a blocking worker thread and receives the only handle to
/// an all air, coordinate-tagged cube. It must be deterministic per coordinate.
/// Light is computed by the cache afterwards.
pub trait CubeGenerator: Send + Sync {
    /// Writes the blocks of `cube`.
    fn populate(&self, cube: &mut Cube) -> anyhow::Result<()>;
}
