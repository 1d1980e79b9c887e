use std::{error::Error, io, sync::Arc};

use cubic_utils::CubeCoord;
use rayon::ThreadPoolBuildError;
use thiserror::Error;

use crate::config::ConfigError;

/// Why a cube could not be made resident.
///
/// Cloneable so every waiter on one in-flight load receives the same error.
#[derive(Debug, Clone, Error)]
pub enum CubeLoadError {
    /// The storage backend failed to read the cube.
    #[error("failed to load cube {coord} from storage")]
    Storage {
        /// The cube that failed.
        coord: CubeCoord,
        /// The backend error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The generator failed to populate the cube.
    #[error("failed to generate cube {coord}")]
    Generation {
        /// The cube that failed.
        coord: CubeCoord,
        /// The generator error.
        #[source]
        source: Arc<dyn Error + Send + Sync>,
    },
    /// The cache is shutting down.
    #[error("cube cache is shutting down")]
    ShuttingDown,
    /// The producing task went away before finishing.
    #[error("load of cube {0} was cancelled")]
    Cancelled(CubeCoord),
}

impl CubeLoadError {
    /// The coordinate the error is about, if any.
    #[must_use]
    pub const fn coord(&self) -> Option<CubeCoord> {
        match self {
            Self::Storage { coord, .. } | Self::Generation { coord, .. } => Some(*coord),
            Self::Cancelled(coord) => Some(*coord),
            Self::ShuttingDown => None,
        }
    }
}

/// Errors creating a cube cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Caches spawn onto the current tokio runtime.
    #[error("cube cache must be created inside a tokio runtime")]
    NoRuntime,
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The light worker pool could not start.
    #[error("failed to start light workers: {0}")]
    LightPool(#[from] ThreadPoolBuildError),
}
