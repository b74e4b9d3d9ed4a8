//! Bounded pool of map engine instances.
//!
//! A [`RendererPool`] owns the engines created for one `(style, scale)`.
//! The number of engines alive at once (idle plus checked out) never exceeds
//! the configured maximum; callers beyond that wait in [`RendererPool::acquire`]
//! in arrival order.
//!
//! A checked-out engine is a [`PooledRenderer`]. Dropping it hands the engine
//! back, so every exit path of a caller (success, error, cancellation, panic)
//! releases exactly once. Once the pool is drained a returned engine is
//! destroyed on a blocking thread instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use mapgen_common::StyleDocument;
use renderer::{EngineError, EngineFactory, MapEngine, RasterTile, TileRenderParams};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::metrics;

/// Errors from [`RendererPool::acquire`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The pool was drained and accepts no more acquires.
    #[error("renderer pool has been drained")]
    Drained,

    /// A new engine could not be created. The pool itself stays usable.
    #[error("engine initialization failed: {0}")]
    EngineInit(String),
}

/// Sizing shared by every pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_instances: usize,
    pub min_instances: usize,
}

impl PoolConfig {
    pub fn from_render_config(config: &mapgen_common::RenderConfig) -> Self {
        Self {
            max_instances: config.pool_max_instances,
            min_instances: config.pool_min_instances,
        }
    }
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Engines alive (idle + checked out + being created)
    pub total: usize,
    pub idle: usize,
    pub checked_out: usize,
    pub max_instances: usize,
    pub drained: bool,
    /// Successful acquires since the pool was created
    pub acquires: u64,
}

struct IdleEngine {
    engine: Box<dyn MapEngine>,
    since: Instant,
}

struct PoolInner {
    /// Most recently released last.
    idle: Vec<IdleEngine>,
    total: usize,
    checked_out: usize,
    drained: bool,
    last_used: Instant,
}

/// Pool of engines for one style at one scale.
pub struct RendererPool {
    factory: Arc<dyn EngineFactory>,
    style: Arc<StyleDocument>,
    scale: f64,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    inner: Mutex<PoolInner>,
    acquires: AtomicU64,
}

impl RendererPool {
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        style: Arc<StyleDocument>,
        scale: f64,
        config: PoolConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            style,
            scale,
            config,
            permits: Arc::new(Semaphore::new(config.max_instances)),
            inner: Mutex::new(PoolInner {
                idle: Vec::new(),
                total: 0,
                checked_out: 0,
                drained: false,
                last_used: Instant::now(),
            }),
            acquires: AtomicU64::new(0),
        })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn style(&self) -> &Arc<StyleDocument> {
        &self.style
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out an engine, waiting while the pool is at its maximum.
    ///
    /// Reuses the most recently released idle engine, otherwise creates one
    /// on a blocking thread. A failed creation gives its slot back, so the
    /// next acquire simply tries again.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledRenderer, PoolError> {
        if self.lock().drained {
            return Err(PoolError::Drained);
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Drained)?;

        {
            let mut inner = self.lock();
            if inner.drained {
                return Err(PoolError::Drained);
            }
            if let Some(idle) = inner.idle.pop() {
                inner.checked_out += 1;
                drop(inner);
                self.acquires.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledRenderer {
                    engine: Some(idle.engine),
                    pool: self.clone(),
                    _permit: permit,
                });
            }
            // Reserve the slot while the engine is built.
            inner.total += 1;
        }

        // The closure builds the guard itself: if this future is dropped
        // while the engine is being created, the finished guard is dropped
        // with the task output and the engine returns to the idle set.
        let pool = self.clone();
        let created = tokio::task::spawn_blocking(move || pool.create_checked_out(permit)).await;
        match created {
            Ok(result) => result,
            Err(e) => Err(PoolError::EngineInit(format!("engine creation panicked: {}", e))),
        }
    }

    fn create_checked_out(self: Arc<Self>, permit: OwnedSemaphorePermit) -> Result<PooledRenderer, PoolError> {
        let reservation = Reservation { pool: &*self, armed: true };
        let start = Instant::now();

        let engine = match self.factory.create(&self.style, self.scale) {
            Ok(engine) => engine,
            Err(e) => {
                warn!(error = %e, scale = self.scale, "Engine creation failed");
                return Err(PoolError::EngineInit(e.to_string()));
            }
        };
        metrics::record_instances_created(1);

        let mut inner = self.lock();
        if inner.drained {
            drop(inner);
            drop(reservation);
            self.destroy_all(vec![engine]);
            return Err(PoolError::Drained);
        }
        inner.checked_out += 1;
        drop(inner);
        reservation.disarm();

        self.acquires.fetch_add(1, Ordering::Relaxed);
        debug!(
            scale = self.scale,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Created engine instance"
        );

        Ok(PooledRenderer {
            engine: Some(engine),
            pool: self.clone(),
            _permit: permit,
        })
    }

    fn release(&self, engine: Box<dyn MapEngine>) {
        let mut inner = self.lock();
        inner.checked_out -= 1;
        inner.last_used = Instant::now();
        if inner.drained {
            inner.total -= 1;
            drop(inner);
            self.destroy_detached(engine);
            return;
        }
        inner.idle.push(IdleEngine {
            engine,
            since: Instant::now(),
        });
    }

    /// Destroy on a blocking thread when inside the runtime. Releases happen
    /// in `Drop`, which may run on an async worker.
    fn destroy_detached(&self, engine: Box<dyn MapEngine>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let factory = self.factory.clone();
                handle.spawn_blocking(move || {
                    factory.destroy(engine);
                    metrics::record_instances_destroyed(1);
                });
            }
            Err(_) => self.destroy_all(vec![engine]),
        }
    }

    fn destroy_all(&self, engines: Vec<Box<dyn MapEngine>>) {
        let n = engines.len();
        for engine in engines {
            self.factory.destroy(engine);
        }
        if n > 0 {
            metrics::record_instances_destroyed(n);
        }
    }

    /// Stop accepting acquires and destroy every engine.
    ///
    /// Idle engines are destroyed now; checked-out engines are destroyed as
    /// they come back. Waiting acquires fail with [`PoolError::Drained`].
    /// Returns the number of idle engines destroyed.
    pub fn drain(&self) -> usize {
        let idle: Vec<Box<dyn MapEngine>> = {
            let mut inner = self.lock();
            if inner.drained {
                return 0;
            }
            inner.drained = true;
            let idle: Vec<_> = inner.idle.drain(..).map(|i| i.engine).collect();
            inner.total -= idle.len();
            idle
        };
        self.permits.close();

        let n = idle.len();
        self.destroy_all(idle);
        info!(scale = self.scale, destroyed = n, "Renderer pool drained");
        n
    }

    /// Destroy idle engines beyond `keep` that have sat unused for at least
    /// `min_idle`, oldest first.
    pub fn evict_idle(&self, keep: usize, min_idle: Duration) -> usize {
        let evicted: Vec<Box<dyn MapEngine>> = {
            let mut inner = self.lock();
            let excess = inner.idle.len().saturating_sub(keep);
            // Oldest release first, so the stale ones form a prefix
            let stale = inner
                .idle
                .iter()
                .take(excess)
                .take_while(|idle| idle.since.elapsed() >= min_idle)
                .count();
            if stale == 0 {
                return 0;
            }
            let evicted: Vec<_> = inner.idle.drain(..stale).map(|i| i.engine).collect();
            inner.total -= evicted.len();
            evicted
        };

        let n = evicted.len();
        self.destroy_all(evicted);
        metrics::record_evictions(n);
        n
    }

    /// Create engines until `count` are idle, without exceeding the maximum.
    /// Returns how many engines were checked out to get there.
    pub async fn warm(self: &Arc<Self>, count: usize) -> Result<usize, PoolError> {
        let count = count.min(self.config.max_instances);
        let mut held = Vec::with_capacity(count);
        while held.len() < count && self.stats().idle + held.len() < count {
            held.push(self.acquire().await?);
        }
        Ok(held.len())
    }

    /// Time since the last release, or zero while anything is checked out.
    pub fn idle_for(&self) -> Duration {
        let inner = self.lock();
        if inner.checked_out > 0 {
            Duration::ZERO
        } else {
            inner.last_used.elapsed()
        }
    }

    pub fn is_drained(&self) -> bool {
        self.lock().drained
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        PoolStats {
            total: inner.total,
            idle: inner.idle.len(),
            checked_out: inner.checked_out,
            max_instances: self.config.max_instances,
            drained: inner.drained,
            acquires: self.acquires.load(Ordering::Relaxed),
        }
    }
}

/// Slot reserved for an engine under construction. Released on drop unless
/// the engine made it into the pool.
struct Reservation<'a> {
    pool: &'a RendererPool,
    armed: bool,
}

impl Reservation<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.lock().total -= 1;
        }
    }
}

/// An engine checked out of a [`RendererPool`].
///
/// Returned to the pool when dropped.
pub struct PooledRenderer {
    engine: Option<Box<dyn MapEngine>>,
    pool: Arc<RendererPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledRenderer {
    /// Render one tile. Blocks; call from a blocking thread.
    pub fn render(&mut self, params: &TileRenderParams) -> Result<RasterTile, EngineError> {
        match self.engine.as_mut() {
            Some(engine) => engine.render(params),
            None => Err(EngineError::Render("engine already released".to_string())),
        }
    }
}

impl Drop for PooledRenderer {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.pool.release(engine);
        }
    }
}
