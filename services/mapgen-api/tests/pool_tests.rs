//! Tests for the renderer pool and the per-style registry.
//!
//! Verifies:
//! 1. Engines are reused and the maximum is never exceeded
//! 2. Failed engine creation is retried on the next acquire
//! 3. Drain destroys idle engines now and loaned engines on release
//! 4. Idle eviction, the periodic sweep and registry bookkeeping
//! 5. Pinned pools keep their standing instances

use std::sync::Arc;
use std::time::{Duration, Instant};

use mapgen_api::eviction::EvictionTask;
use mapgen_api::registry::pool_key;
use mapgen_api::{AppState, EvictionPolicy, PoolConfig, PoolError, PoolRegistry, RendererPool};
use mapgen_common::{LngLat, RenderConfig, StyleDocument};
use renderer::TileRenderParams;
use test_utils::{wait_until, CountingEngineFactory};
use tokio_util::sync::CancellationToken;

fn style() -> Arc<StyleDocument> {
    Arc::new(StyleDocument::background_only("#ffffff"))
}

fn config(max_instances: usize) -> PoolConfig {
    PoolConfig {
        max_instances,
        min_instances: 1,
    }
}

fn pool(factory: &Arc<CountingEngineFactory>, max_instances: usize) -> Arc<RendererPool> {
    RendererPool::new(factory.clone(), style(), 1.0, config(max_instances))
}

/// Reclaim everything the policy allows, regardless of age.
fn sweep_now() -> EvictionPolicy {
    EvictionPolicy {
        engine_idle: Duration::ZERO,
        pool_idle: Duration::ZERO,
    }
}

fn params() -> TileRenderParams {
    TileRenderParams {
        center: LngLat::new(24.9, 60.5),
        width: 8,
        height: 8,
        zoom: 10.0,
        pitch: 0.0,
        bearing: 0.0,
        scale: 1.0,
    }
}

// ============================================================================
// Acquire and release
// ============================================================================

#[tokio::test]
async fn test_released_engine_is_reused() {
    let factory = Arc::new(CountingEngineFactory::new());
    let pool = pool(&factory, 4);

    let mut renderer = pool.acquire().await.unwrap();
    let tile = renderer.render(&params()).unwrap();
    assert_eq!((tile.width, tile.height), (8, 8));
    drop(renderer);

    let _again = pool.acquire().await.unwrap();
    assert_eq!(factory.counters().creates(), 1);
    assert_eq!(pool.stats().acquires, 2);
    assert_eq!(pool.stats().checked_out, 1);
}

#[tokio::test]
async fn test_acquire_waits_at_maximum() {
    let factory = Arc::new(CountingEngineFactory::new());
    let pool = pool(&factory, 2);

    let first = pool.acquire().await.unwrap();
    let _second = pool.acquire().await.unwrap();

    let waiting = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
    assert!(waiting.is_err(), "third acquire should wait while two are loaned");
    assert_eq!(pool.stats().total, 2);

    drop(first);
    let third = tokio::time::timeout(Duration::from_secs(2), pool.acquire()).await;
    assert!(matches!(third, Ok(Ok(_))));
    assert_eq!(factory.counters().creates(), 2);
}

#[tokio::test]
async fn test_failed_creation_is_retried() {
    let factory = Arc::new(CountingEngineFactory::new().failing_init(1));
    let pool = pool(&factory, 1);

    let first = pool.acquire().await;
    assert!(matches!(first, Err(PoolError::EngineInit(_))));
    assert_eq!(pool.stats().total, 0);

    // The failed attempt gave its slot back, so a pool of one still works
    let second = pool.acquire().await;
    assert!(second.is_ok());
    assert_eq!(factory.counters().create_attempts(), 2);
    assert_eq!(factory.counters().creates(), 1);
}

#[tokio::test]
async fn test_render_failure_keeps_engine() {
    let factory = Arc::new(CountingEngineFactory::new().failing_after(0));
    let pool = pool(&factory, 1);

    let mut renderer = pool.acquire().await.unwrap();
    assert!(renderer.render(&params()).is_err());
    drop(renderer);

    assert_eq!(pool.stats().idle, 1);
    assert_eq!(factory.counters().destroys(), 0);
}

// ============================================================================
// Drain and eviction
// ============================================================================

#[tokio::test]
async fn test_drain_destroys_idle_now_and_loaned_on_release() {
    let factory = Arc::new(CountingEngineFactory::new());
    let pool = pool(&factory, 4);
    let counters = factory.counters();

    let loaned = pool.acquire().await.unwrap();
    drop(pool.acquire().await.unwrap());
    assert_eq!(pool.stats().idle, 1);

    assert_eq!(pool.drain(), 1);
    assert_eq!(counters.destroys(), 1);
    assert!(matches!(pool.acquire().await, Err(PoolError::Drained)));

    drop(loaned);
    assert_eq!(pool.stats().total, 0);
    assert!(wait_until(Duration::from_secs(2), || counters.destroys() == 2).await);
    assert_eq!(counters.live(), 0);
}

#[tokio::test]
async fn test_release_after_drain_does_not_block_runtime() {
    let factory = Arc::new(CountingEngineFactory::new().with_destroy_delay(Duration::from_millis(300)));
    let pool = pool(&factory, 2);
    let counters = factory.counters();

    let loaned = pool.acquire().await.unwrap();
    assert_eq!(pool.drain(), 0);

    let start = Instant::now();
    drop(loaned);
    assert!(start.elapsed() < Duration::from_millis(150), "release waited for destroy");
    assert_eq!(counters.destroys(), 0);

    assert!(wait_until(Duration::from_secs(2), || counters.destroys() == 1).await);
}

#[tokio::test]
async fn test_drain_fails_waiting_acquires() {
    let factory = Arc::new(CountingEngineFactory::new());
    let pool = pool(&factory, 1);

    let _held = pool.acquire().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.drain();
    let result = tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
    assert_eq!(result, Err(PoolError::Drained));
}

#[tokio::test]
async fn test_evict_idle_keeps_minimum() {
    let factory = Arc::new(CountingEngineFactory::new());
    let pool = pool(&factory, 4);

    assert_eq!(pool.warm(3).await.unwrap(), 3);
    assert_eq!(pool.stats().idle, 3);

    assert_eq!(pool.evict_idle(1, Duration::ZERO), 2);
    assert_eq!(pool.stats().idle, 1);
    assert_eq!(pool.stats().total, 1);
    assert_eq!(factory.counters().destroys(), 2);

    // Nothing further to evict
    assert_eq!(pool.evict_idle(1, Duration::ZERO), 0);
}

#[tokio::test]
async fn test_evict_idle_spares_recently_used_engines() {
    let factory = Arc::new(CountingEngineFactory::new());
    let pool = pool(&factory, 4);
    pool.warm(3).await.unwrap();

    // Too young to evict
    assert_eq!(pool.evict_idle(0, Duration::from_secs(3600)), 0);

    tokio::time::sleep(Duration::from_millis(60)).await;
    // Refresh one engine; the other two have been idle since warm-up
    drop(pool.acquire().await.unwrap());

    assert_eq!(pool.evict_idle(0, Duration::from_millis(40)), 2);
    assert_eq!(pool.stats().idle, 1);
    assert_eq!(factory.counters().creates(), 3);
}

#[tokio::test]
async fn test_warm_counts_existing_idle_engines() {
    let factory = Arc::new(CountingEngineFactory::new());
    let pool = pool(&factory, 4);

    pool.warm(2).await.unwrap();
    pool.warm(2).await.unwrap();
    assert_eq!(factory.counters().creates(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checkouts_are_exclusive_and_bounded() {
    let factory = Arc::new(CountingEngineFactory::new().with_render_delay(Duration::from_millis(5)));
    let pool = pool(&factory, 3);

    let mut tasks = Vec::new();
    for _ in 0..24 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let mut renderer = pool.acquire().await.unwrap();
            tokio::task::spawn_blocking(move || renderer.render(&params()).map(|_| ()))
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let counters = factory.counters();
    assert_eq!(counters.renders(), 24);
    assert_eq!(counters.exclusivity_violations(), 0);
    assert!(counters.max_in_flight() <= 3);
    assert!(counters.creates() <= 3);
    assert!(wait_until(Duration::from_secs(1), || pool.stats().checked_out == 0).await);
}

// ============================================================================
// Registry
// ============================================================================

#[tokio::test]
async fn test_registry_keys_by_style_and_scale() {
    let factory = Arc::new(CountingEngineFactory::new());
    let registry = PoolRegistry::new(factory, config(2));
    let style = style();

    let a = registry.get_or_create(&style, 1.0).unwrap();
    let b = registry.get_or_create(&style, 1.0).unwrap();
    let c = registry.get_or_create(&style, 2.0).unwrap();
    let other = Arc::new(StyleDocument::background_only("#000000"));
    let d = registry.get_or_create(&other, 1.0).unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert!(!Arc::ptr_eq(&a, &d));
    assert_eq!(registry.len(), 3);
    assert_ne!(pool_key(&style, 1.0), pool_key(&style, 2.0));
}

#[tokio::test]
async fn test_registry_discard_replaces_pool() {
    let factory = Arc::new(CountingEngineFactory::new());
    let registry = PoolRegistry::new(factory.clone(), config(2));
    let style = style();

    let pool = registry.get_or_create(&style, 1.0).unwrap();
    drop(pool.acquire().await.unwrap());

    registry.discard(&pool);
    assert!(pool.is_drained());
    assert!(registry.is_empty());
    assert_eq!(factory.counters().live(), 0);

    let fresh = registry.get_or_create(&style, 1.0).unwrap();
    assert!(!Arc::ptr_eq(&pool, &fresh));
    assert!(fresh.acquire().await.is_ok());
}

#[tokio::test]
async fn test_registry_evicts_unused_pools_only() {
    let factory = Arc::new(CountingEngineFactory::new());
    let registry = PoolRegistry::new(factory.clone(), config(4));
    let style = style();

    let busy = registry.get_or_create(&style, 2.0).unwrap();
    let _loan = busy.acquire().await.unwrap();

    {
        let idle = registry.get_or_create(&style, 1.0).unwrap();
        idle.warm(3).await.unwrap();
    }

    let report = registry.evict(sweep_now());
    assert_eq!(report.pools_removed, 1);
    assert_eq!(report.instances_evicted, 3);
    assert_eq!(registry.len(), 1);
    assert!(!busy.is_drained());
}

#[tokio::test]
async fn test_registry_trims_idle_sets_of_live_pools() {
    let factory = Arc::new(CountingEngineFactory::new());
    let registry = PoolRegistry::new(factory.clone(), config(4));
    let pool = registry.get_or_create(&style(), 1.0).unwrap();
    pool.warm(3).await.unwrap();

    // Held by this test, so only trimmed, never removed
    let report = registry.evict(sweep_now());
    assert_eq!(report.pools_removed, 0);
    assert_eq!(report.instances_evicted, 2);
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn test_pinned_pool_survives_idle_sweep() {
    let factory = Arc::new(CountingEngineFactory::new());
    let registry = PoolRegistry::new(factory.clone(), config(4));
    let style = style();

    registry.pin(&style, 1.0).unwrap().warm(2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let report = registry.evict(sweep_now());
    assert_eq!(report.pools_removed, 0);
    assert_eq!(report.instances_evicted, 1);
    assert_eq!(registry.len(), 1);
    assert_eq!(factory.counters().live(), 1);

    // Same pool, still warm
    let pool = registry.get_or_create(&style, 1.0).unwrap();
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn test_default_pool_keeps_standing_instance() {
    let factory = Arc::new(CountingEngineFactory::new());
    let config = RenderConfig {
        pool_max_instances: 2,
        pool_min_instances: 1,
        ..RenderConfig::default()
    };
    let state = AppState::new(config, factory.clone(), StyleDocument::background_only("#ffffff")).unwrap();

    state.warm_default_pool().await;
    assert_eq!(factory.counters().live(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = state.jobs.registry().evict(sweep_now());
    assert_eq!(report, Default::default());
    assert_eq!(factory.counters().live(), 1);
    assert_eq!(state.jobs.registry().len(), 1);
}

#[tokio::test]
async fn test_eviction_task_rewarms_discarded_pinned_pool() {
    let factory = Arc::new(CountingEngineFactory::new());
    let registry = Arc::new(PoolRegistry::new(factory.clone(), config(4)));
    let style = style();

    let pool = registry.pin(&style, 1.0).unwrap();
    pool.warm(1).await.unwrap();
    registry.discard(&pool);
    assert_eq!(factory.counters().live(), 0);

    let shutdown = CancellationToken::new();
    let task = EvictionTask::new(registry.clone(), Duration::from_millis(20), Duration::ZERO);
    let handle = tokio::spawn(task.run_until(shutdown.clone()));

    assert!(wait_until(Duration::from_secs(2), || factory.counters().live() == 1).await);
    let fresh = registry.get_or_create(&style, 1.0).unwrap();
    assert!(!Arc::ptr_eq(&pool, &fresh));
    assert_eq!(fresh.stats().idle, 1);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_registry_drain_all_closes() {
    let factory = Arc::new(CountingEngineFactory::new());
    let registry = PoolRegistry::new(factory.clone(), config(2));
    let style = style();

    registry.get_or_create(&style, 1.0).unwrap().warm(2).await.unwrap();
    assert_eq!(registry.drain_all(), 2);
    assert_eq!(factory.counters().live(), 0);
    assert!(matches!(registry.get_or_create(&style, 1.0), Err(PoolError::Drained)));
}

#[tokio::test]
async fn test_eviction_task_sweeps_until_shutdown() {
    let factory = Arc::new(CountingEngineFactory::new());
    let registry = Arc::new(PoolRegistry::new(factory.clone(), config(4)));
    let pool = registry.get_or_create(&style(), 1.0).unwrap();
    pool.warm(3).await.unwrap();

    let shutdown = CancellationToken::new();
    let task = EvictionTask::new(registry.clone(), Duration::from_millis(20), Duration::from_secs(3600));
    let handle = tokio::spawn(task.run_until(shutdown.clone()));

    assert!(wait_until(Duration::from_secs(2), || pool.stats().idle == 1).await);
    assert_eq!(registry.len(), 1);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}
