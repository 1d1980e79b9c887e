//! Cube persistence contract.
//!
//! The cache only hands storage plain [`CubeSnapshot`]s, so any byte format
//! can sit behind [`CubeStorage`]. Calls are made from tokio's blocking pool.

mod ram_only;

use std::io;

use cubic_utils::CubeCoord;

pub use crate::cube::CubeSnapshot;
pub use ram_only::RamOnlyStorage;

/// Persistence backend for cubes.
pub trait CubeStorage: Send + Sync {
    /// Loads a cube.
    ///
    /// Returns `Ok(None)` if the cube was never saved, which makes the cache
    /// fall back to the generator.
    fn load(&self, coord: CubeCoord) -> io::Result<Option<CubeSnapshot>>;

    /// Saves a cube. On error the cube stays dirty and is retried later.
    fn save(&self, snapshot: &CubeSnapshot) -> io::Result<()>;

    /// Flushes anything buffered by the backend.
    fn flush(&self) -> io::Result<()>;
}
