//! Sky and block light propagation across cube boundaries.
//!
//! Both fields are flood filled breadth first. Removal is done in two phases:
//! first everything that depended on the removed light is zeroed, then the
//! surviving frontier is spread again.

mod access;
mod direction;
mod engine;
mod light_cache;
mod light_queue;
mod propagation;
mod queue_entry;
mod sky;
mod update;

pub use access::{CubeLookupCache, LightAccess, SingleCubeAccess, WorldLightAccess};
pub use direction::Direction;
pub use engine::{LightEngine, LightStats};
pub use light_cache::LightCache;
pub use light_queue::LightQueue;
pub use propagation::{LightPropagator, attenuate};
pub use queue_entry::QueueEntry;
pub use sky::SkyEntry;
pub use update::{LightPriority, LightUpdate};
