//! World configuration, loaded from a JSON5 file.

use std::{fs, io, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG: &str = include_str!("../../package-content/cubic_config.json5");

/// Errors raised while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file couldn't be read or written.
    #[error("config io error: {0}")]
    Io(#[from] io::Error),
    /// The file isn't valid JSON5 for this schema.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json5::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// How observer protection is measured around an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionMetric {
    /// Axis aligned box.
    #[default]
    Chebyshev,
    /// Ellipsoid with horizontal and vertical radii.
    Euclidean,
}

/// What happens to an evicted cube whose save keeps failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushFailurePolicy {
    /// Keep it in memory and retry forever.
    Retain,
    /// Give up and drop it after `max_flush_attempts` failures.
    #[default]
    DropAfterAttempts,
}

/// Cube cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct CacheConfig {
    pub high_water_mark: usize,
    pub low_water_mark: usize,
    pub loads_per_tick: usize,
    pub unloads_per_tick: usize,
    pub generation_workers: usize,
    pub retention_metric: RetentionMetric,
    pub spherical_regions: bool,
    pub flush_failure_policy: FlushFailurePolicy,
    pub max_flush_attempts: u32,
    pub maintenance_interval_ms: u64,
    pub autosave_per_cycle: usize,
    pub shutdown_grace_ms: u64,
}

impl CacheConfig {
    /// Period of the maintenance task.
    #[must_use]
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    /// How long shutdown waits for in-flight tasks.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            high_water_mark: 4096,
            low_water_mark: 3584,
            loads_per_tick: 64,
            unloads_per_tick: 32,
            generation_workers: 4,
            retention_metric: RetentionMetric::Chebyshev,
            spherical_regions: false,
            flush_failure_policy: FlushFailurePolicy::DropAfterAttempts,
            max_flush_attempts: 5,
            maintenance_interval_ms: 1000,
            autosave_per_cycle: 64,
            shutdown_grace_ms: 5000,
        }
    }
}

/// Light engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct LightConfig {
    pub light_workers: usize,
    pub batch_updates: bool,
    pub max_batch_size: usize,
    pub light_cache_ttl_ms: u64,
    pub open_sky_cube_y: i32,
}

impl LightConfig {
    /// Lifetime of a cached light query.
    #[must_use]
    pub fn light_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.light_cache_ttl_ms)
    }
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            light_workers: 2,
            batch_updates: false,
            max_batch_size: 1024,
            light_cache_ttl_ms: 2000,
            open_sky_cube_y: 16,
        }
    }
}

/// Everything configurable about a world.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Cube cache settings.
    pub cache: CacheConfig,
    /// Light engine settings.
    pub light: LightConfig,
}

impl WorldConfig {
    /// Reads the config at `path`, writing the bundled default there first if
    /// the file doesn't exist.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, DEFAULT_CONFIG)?;
        }
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Parses and validates a JSON5 config.
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json5::from_str(source)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Checks value ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), &'static str> {
        let cache = &self.cache;
        if cache.high_water_mark == 0 {
            return Err("high_water_mark must be greater than 0");
        }
        if cache.low_water_mark > cache.high_water_mark {
            return Err("low_water_mark must not exceed high_water_mark");
        }
        if cache.loads_per_tick == 0 || cache.unloads_per_tick == 0 {
            return Err("loads_per_tick and unloads_per_tick must be greater than 0");
        }
        if cache.generation_workers == 0 {
            return Err("generation_workers must be greater than 0");
        }
        if cache.max_flush_attempts == 0 {
            return Err("max_flush_attempts must be greater than 0");
        }
        if cache.maintenance_interval_ms == 0 {
            return Err("maintenance_interval_ms must be greater than 0");
        }
        let light = &self.light;
        if light.light_workers == 0 {
            return Err("light_workers must be greater than 0");
        }
        if light.max_batch_size == 0 {
            return Err("max_batch_size must be greater than 0");
        }
        Ok(())
    }
}
