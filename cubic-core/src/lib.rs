//! # Cubic core
//!
//! A cube cache for an effectively infinite voxel world split into 16³ cubes,
//! and a light engine that keeps sky and block light correct across the
//! boundaries of independently loaded cubes.
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    clippy::unwrap_used
)]
#![allow(
    clippy::single_call_fn,
    clippy::multiple_inherent_impl,
    clippy::shadow_unrelated,
    clippy::missing_errors_doc,
    clippy::struct_excessive_bools,
    clippy::needless_pass_by_value
)]

pub mod block;
pub mod cache;
pub mod config;
pub mod cube;
pub mod generator;
pub mod light_engine;
pub mod observer;
pub mod storage;

pub use block::{BlockProperties, BlockTable, MAX_LIGHT};
pub use cache::{CacheError, CacheStats, CubeCache, CubeFuture, CubeLoadError, TickReport};
pub use config::WorldConfig;
pub use cube::{Cube, LightField};
pub use generator::CubeGenerator;
pub use light_engine::LightEngine;
pub use observer::RetentionRadius;
pub use storage::CubeStorage;
