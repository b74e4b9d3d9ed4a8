//! Configuration for tiling, the renderer pool and job handling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{MapGenError, MapGenResult};

/// Largest single renderer call, in physical pixels, used by the original service.
pub const DEFAULT_MAX_TILE_SIZE: u32 = 1000;

/// Smallest accepted `max_tile_size`; keeps every planned tile at least one
/// physical pixel for any accepted scale.
pub const MIN_TILE_SIZE: u32 = 64;

/// Floor for the pool ceiling. The engine spends much of a render waiting on
/// tile fetches, so more instances than cores still pays off.
pub const MIN_POOL_CEILING: usize = 10;

/// Configuration consumed by the rendering core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Maximum edge of one renderer call in physical pixels (divided by scale when planning).
    pub max_tile_size: u32,

    /// Maximum engine instances per pool.
    pub pool_max_instances: usize,

    /// Instances kept warm per pool by the eviction sweep.
    pub pool_min_instances: usize,

    /// Wall-clock budget for one render job.
    pub render_timeout_ms: u64,

    /// Period of the idle-instance eviction sweep.
    pub eviction_interval_ms: u64,

    /// A pool with no checkouts for this long is drained and forgotten.
    pub pool_idle_timeout_ms: u64,

    /// Largest accepted logical width or height of a request.
    pub max_image_edge: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_tile_size: DEFAULT_MAX_TILE_SIZE,
            pool_max_instances: default_pool_max_instances(),
            pool_min_instances: 1,
            render_timeout_ms: 300_000,
            eviction_interval_ms: 60_000,
            pool_idle_timeout_ms: 600_000,
            max_image_edge: 20_000,
        }
    }
}

/// `max(10, available cores)`.
pub fn default_pool_max_instances() -> usize {
    num_cpus::get().max(MIN_POOL_CEILING)
}

impl RenderConfig {
    /// Load configuration from environment variables on top of the defaults.
    ///
    /// Unparsable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`RenderConfig::from_env`] but reading from an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(size) = lookup("MAX_TILE_SIZE").and_then(|v| v.parse().ok()) {
            config.max_tile_size = size;
        }

        if let Some(max) = lookup("POOL_MAX_INSTANCES").and_then(|v| v.parse().ok()) {
            config.pool_max_instances = max;
        }

        if let Some(min) = lookup("POOL_MIN_INSTANCES").and_then(|v| v.parse().ok()) {
            config.pool_min_instances = min;
        }

        if let Some(ms) = lookup("RENDER_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.render_timeout_ms = ms;
        }

        if let Some(ms) = lookup("EVICTION_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            config.eviction_interval_ms = ms;
        }

        if let Some(ms) = lookup("POOL_IDLE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.pool_idle_timeout_ms = ms;
        }

        if let Some(edge) = lookup("MAX_IMAGE_EDGE").and_then(|v| v.parse().ok()) {
            config.max_image_edge = edge;
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> MapGenResult<()> {
        if self.max_tile_size < MIN_TILE_SIZE {
            return Err(MapGenError::InvalidConfig(format!(
                "max_tile_size must be at least {}",
                MIN_TILE_SIZE
            )));
        }
        if self.pool_max_instances == 0 {
            return Err(MapGenError::InvalidConfig(
                "pool_max_instances must be greater than 0".to_string(),
            ));
        }
        if self.pool_min_instances > self.pool_max_instances {
            return Err(MapGenError::InvalidConfig(format!(
                "pool_min_instances ({}) exceeds pool_max_instances ({})",
                self.pool_min_instances, self.pool_max_instances
            )));
        }
        if self.render_timeout_ms == 0 {
            return Err(MapGenError::InvalidConfig(
                "render_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.eviction_interval_ms == 0 {
            return Err(MapGenError::InvalidConfig(
                "eviction_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_image_edge == 0 {
            return Err(MapGenError::InvalidConfig(
                "max_image_edge must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_idle_timeout_ms)
    }
}
