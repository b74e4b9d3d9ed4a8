//! One renderer pool per `(style, scale)`.
//!
//! Pinned pools (the default style) are never removed by the idle sweep and
//! keep their minimum standing instances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mapgen_common::StyleDocument;
use renderer::EngineFactory;
use serde::Serialize;
use tracing::{debug, info};

use crate::metrics;
use crate::pool::{PoolConfig, PoolError, PoolStats, RendererPool};

/// Registry key: style digest plus scale.
pub fn pool_key(style: &StyleDocument, scale: f64) -> String {
    format!("{}@{}", style.digest(), scale)
}

/// Result of one eviction sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub instances_evicted: usize,
    pub pools_removed: usize,
}

/// Ages after which the sweep reclaims engines and pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Idle engines above the minimum are destroyed once unused this long
    pub engine_idle: Duration,
    /// Unpinned pools nobody holds are removed once unused this long
    pub pool_idle: Duration,
}

struct RegistryInner {
    pools: HashMap<String, Arc<RendererPool>>,
    /// Pools kept alive across idle sweeps and rebuilt after a discard
    pinned: HashMap<String, (Arc<StyleDocument>, f64)>,
    closed: bool,
}

/// Pools keyed by [`pool_key`], all created from one factory with the same sizing.
pub struct PoolRegistry {
    factory: Arc<dyn EngineFactory>,
    config: PoolConfig,
    inner: Mutex<RegistryInner>,
}

impl PoolRegistry {
    pub fn new(factory: Arc<dyn EngineFactory>, config: PoolConfig) -> Self {
        Self {
            factory,
            config,
            inner: Mutex::new(RegistryInner {
                pools: HashMap::new(),
                pinned: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// The pool for `(style, scale)`, created on first use.
    ///
    /// Fails with [`PoolError::Drained`] once the registry is shut down.
    pub fn get_or_create(&self, style: &Arc<StyleDocument>, scale: f64) -> Result<Arc<RendererPool>, PoolError> {
        let key = pool_key(style, scale);
        let mut inner = self.lock();
        if inner.closed {
            return Err(PoolError::Drained);
        }
        if let Some(pool) = inner.pools.get(&key) {
            if !pool.is_drained() {
                return Ok(pool.clone());
            }
        }

        debug!(pool = %key, "Creating renderer pool");
        let pool = RendererPool::new(self.factory.clone(), style.clone(), scale, self.config);
        inner.pools.insert(key, pool.clone());
        Ok(pool)
    }

    /// Like [`get_or_create`](Self::get_or_create), and exempt the pool from
    /// idle removal for the life of the registry.
    pub fn pin(&self, style: &Arc<StyleDocument>, scale: f64) -> Result<Arc<RendererPool>, PoolError> {
        let pool = self.get_or_create(style, scale)?;
        self.lock()
            .pinned
            .insert(pool_key(style, scale), (style.clone(), scale));
        Ok(pool)
    }

    /// Current pools for every pinned `(style, scale)`, recreating any that
    /// were discarded. Empty once the registry is closed.
    pub fn pinned_pools(&self) -> Vec<Arc<RendererPool>> {
        let pinned: Vec<(Arc<StyleDocument>, f64)> = self.lock().pinned.values().cloned().collect();
        pinned
            .iter()
            .filter_map(|(style, scale)| self.get_or_create(style, *scale).ok())
            .collect()
    }

    /// Drain `pool` and forget it, so the next request for its style starts
    /// a fresh one. A newer pool under the same key is left alone.
    pub fn discard(&self, pool: &Arc<RendererPool>) {
        let key = pool_key(pool.style(), pool.scale());
        {
            let mut inner = self.lock();
            if inner
                .pools
                .get(&key)
                .map_or(false, |current| Arc::ptr_eq(current, pool))
            {
                inner.pools.remove(&key);
            }
        }
        pool.drain();
        info!(pool = %key, "Discarded faulted renderer pool");
    }

    /// Trim every pool's idle set towards `min_instances`, and drain
    /// unpinned pools that nobody has used for `policy.pool_idle`.
    ///
    /// A pool is only removed while the registry holds its sole reference,
    /// so a job that just looked it up is never handed a drained pool.
    pub fn evict(&self, policy: EvictionPolicy) -> EvictionReport {
        let mut report = EvictionReport::default();

        let removed: Vec<Arc<RendererPool>> = {
            let mut inner = self.lock();
            let stale: Vec<String> = inner
                .pools
                .iter()
                .filter(|(key, pool)| {
                    !inner.pinned.contains_key(*key)
                        && Arc::strong_count(*pool) == 1
                        && pool.idle_for() >= policy.pool_idle
                })
                .map(|(key, _)| key.clone())
                .collect();
            stale
                .iter()
                .filter_map(|key| inner.pools.remove(key))
                .collect()
        };

        let drained: usize = removed.iter().map(|pool| pool.drain()).sum();
        if drained > 0 {
            metrics::record_evictions(drained);
        }
        report.instances_evicted += drained;
        report.pools_removed = removed.len();

        let remaining: Vec<Arc<RendererPool>> = self.lock().pools.values().cloned().collect();
        for pool in remaining {
            report.instances_evicted += pool.evict_idle(self.config.min_instances, policy.engine_idle);
        }

        report
    }

    /// Close the registry and drain every pool.
    pub fn drain_all(&self) -> usize {
        let pools: Vec<Arc<RendererPool>> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.pools.drain().map(|(_, pool)| pool).collect()
        };
        pools.iter().map(|pool| pool.drain()).sum()
    }

    pub fn len(&self) -> usize {
        self.lock().pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-pool statistics keyed by [`pool_key`].
    pub fn stats(&self) -> HashMap<String, PoolStats> {
        self.lock()
            .pools
            .iter()
            .map(|(key, pool)| (key.clone(), pool.stats()))
            .collect()
    }
}
