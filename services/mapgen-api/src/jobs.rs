//! Render job manager.
//!
//! Identical requests (same options, same style) share one job. The job
//! table maps a content key to the running job and the number of callers
//! waiting on it. Every read-modify-write of the table happens under one
//! lock, so two identical requests can never both start a job.
//!
//! A job runs as its own task and removes itself from the table when it
//! settles, whatever the outcome. A caller going away only cancels the job
//! when it was the last one waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use mapgen_common::{job_key, MapGenError, MapGenResult, RenderConfig, RenderOptions, StyleDocument};
use renderer::{compute_world_file, plan, EngineError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assembler::{assemble, AssembleError};
use crate::metrics::{self, Timer};
use crate::pool::PoolError;
use crate::registry::PoolRegistry;

/// A finished render.
#[derive(Debug)]
pub struct RenderResult {
    /// RGBA8 pixels, row-major
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// World file for the image, `a|0|0|e|x|y|`
    pub world_file: String,
    pub tiles: usize,
}

/// Why a job failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobFailure {
    #[error("engine initialization failed: {0}")]
    EngineInit(String),

    #[error("render failed: {0}")]
    Render(String),

    /// The engine reported an unrecoverable fault and its pool was discarded.
    #[error("renderer pool fault: {0}")]
    PoolFault(String),
}

/// Why a job was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Every caller waiting on the job went away.
    ClientGone,
    TimedOut,
    Shutdown,
}

/// Terminal state of a job, shared by every caller waiting on it.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success(Arc<RenderResult>),
    Failure(JobFailure),
    Cancelled(CancelReason),
}

impl JobOutcome {
    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Success(_) => "success",
            JobOutcome::Failure(JobFailure::EngineInit(_)) => "engine_init_failed",
            JobOutcome::Failure(JobFailure::Render(_)) => "render_failed",
            JobOutcome::Failure(JobFailure::PoolFault(_)) => "pool_fault",
            JobOutcome::Cancelled(CancelReason::ClientGone) => "cancelled",
            JobOutcome::Cancelled(CancelReason::TimedOut) => "timeout",
            JobOutcome::Cancelled(CancelReason::Shutdown) => "shutdown",
        }
    }

    pub fn into_result(self) -> MapGenResult<Arc<RenderResult>> {
        match self {
            JobOutcome::Success(result) => Ok(result),
            JobOutcome::Failure(JobFailure::EngineInit(msg)) => Err(MapGenError::EngineInit(msg)),
            JobOutcome::Failure(JobFailure::Render(msg)) => Err(MapGenError::RenderError(msg)),
            JobOutcome::Failure(JobFailure::PoolFault(msg)) => Err(MapGenError::PoolFault(msg)),
            JobOutcome::Cancelled(CancelReason::ClientGone) => Err(MapGenError::Cancelled),
            JobOutcome::Cancelled(CancelReason::TimedOut) => Err(MapGenError::Timeout),
            JobOutcome::Cancelled(CancelReason::Shutdown) => Err(MapGenError::ShuttingDown),
        }
    }
}

type SharedOutcome = Shared<BoxFuture<'static, JobOutcome>>;

struct JobEntry {
    id: u64,
    outcome: SharedOutcome,
    clients: usize,
    cancel: CancellationToken,
}

/// Process-wide job table.
pub struct JobManager {
    registry: Arc<PoolRegistry>,
    config: RenderConfig,
    table: Mutex<HashMap<String, JobEntry>>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl JobManager {
    pub fn new(registry: Arc<PoolRegistry>, config: RenderConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            config,
            table: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Jobs currently in the table.
    pub fn active_jobs(&self) -> usize {
        self.lock().len()
    }

    /// Callers currently waiting on the job for `key`.
    pub fn subscribers(&self, key: &str) -> Option<usize> {
        self.lock().get(key).map(|entry| entry.clients)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Render `options` with `style`, joining an identical job if one is running.
    ///
    /// Dropping the returned future detaches this caller; if it was the last
    /// caller, the job is cancelled.
    pub async fn submit(self: &Arc<Self>, options: RenderOptions, style: Arc<StyleDocument>) -> JobOutcome {
        if self.shutdown.is_cancelled() {
            return JobOutcome::Cancelled(CancelReason::Shutdown);
        }

        let key = job_key(&options, &style);
        let (outcome, subscription) = self.subscribe(key, options, style);
        let result = outcome.await;
        drop(subscription);
        result
    }

    /// Like [`submit`](Self::submit), but the caller can also give up through
    /// `client`. A caller that gives up gets [`CancelReason::ClientGone`].
    pub async fn submit_cancellable(
        self: &Arc<Self>,
        options: RenderOptions,
        style: Arc<StyleDocument>,
        client: &CancellationToken,
    ) -> JobOutcome {
        tokio::select! {
            outcome = self.submit(options, style) => outcome,
            _ = client.cancelled() => JobOutcome::Cancelled(CancelReason::ClientGone),
        }
    }

    fn subscribe(
        self: &Arc<Self>,
        key: String,
        options: RenderOptions,
        style: Arc<StyleDocument>,
    ) -> (SharedOutcome, Subscription) {
        let mut table = self.lock();

        if let Some(entry) = table.get_mut(&key) {
            // A job whose last caller left is finishing its cancellation;
            // it must not be joined.
            if !entry.cancel.is_cancelled() {
                entry.clients += 1;
                metrics::record_job_deduplicated();
                debug!(job_key = %short(&key), clients = entry.clients, "Joined running job");
                let subscription = Subscription {
                    manager: self.clone(),
                    key: key.clone(),
                    id: entry.id,
                };
                return (entry.outcome.clone(), subscription);
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(self.clone().run_job(key.clone(), id, options, style, cancel.clone()));
        let outcome = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Render job task failed");
                    JobOutcome::Failure(JobFailure::Render(format!("job task failed: {}", e)))
                }
            }
        }
        .boxed()
        .shared();

        table.insert(
            key.clone(),
            JobEntry {
                id,
                outcome: outcome.clone(),
                clients: 1,
                cancel,
            },
        );
        metrics::record_job_started();

        (outcome, Subscription { manager: self.clone(), key, id })
    }

    async fn run_job(
        self: Arc<Self>,
        key: String,
        id: u64,
        options: RenderOptions,
        style: Arc<StyleDocument>,
        cancel: CancellationToken,
    ) -> JobOutcome {
        let _entry = TableEntry {
            manager: &self,
            key: &key,
            id,
        };
        let timer = Timer::start();

        let outcome = match tokio::time::timeout(
            self.config.render_timeout(),
            self.execute(&options, &style, &cancel),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                warn!(
                    job_key = %short(&key),
                    timeout_ms = self.config.render_timeout_ms,
                    "Render job timed out"
                );
                JobOutcome::Cancelled(CancelReason::TimedOut)
            }
        };

        metrics::record_job_finished(outcome.label(), &timer);
        match &outcome {
            JobOutcome::Success(result) => info!(
                job_key = %short(&key),
                width = result.width,
                height = result.height,
                tiles = result.tiles,
                elapsed_ms = timer.elapsed_ms(),
                "Render job finished"
            ),
            JobOutcome::Failure(failure) => warn!(
                job_key = %short(&key),
                error = %failure,
                elapsed_ms = timer.elapsed_ms(),
                "Render job failed"
            ),
            JobOutcome::Cancelled(CancelReason::TimedOut) => {}
            JobOutcome::Cancelled(reason) => info!(
                job_key = %short(&key),
                reason = ?reason,
                elapsed_ms = timer.elapsed_ms(),
                "Render job cancelled"
            ),
        }
        outcome
    }

    async fn execute(
        &self,
        options: &RenderOptions,
        style: &Arc<StyleDocument>,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let plan = match plan(options, self.config.max_tile_size) {
            Ok(plan) => plan,
            Err(e) => return JobOutcome::Failure(JobFailure::Render(e.to_string())),
        };
        debug!(
            tiles_x = plan.tile_count_x,
            tiles_y = plan.tile_count_y,
            output_width = plan.output_width,
            output_height = plan.output_height,
            "Planned render"
        );

        let pool = match self.registry.get_or_create(style, options.scale) {
            Ok(pool) => pool,
            Err(_) => return JobOutcome::Cancelled(CancelReason::Shutdown),
        };

        match assemble(&plan, options, &pool, cancel).await {
            Ok(image) => JobOutcome::Success(Arc::new(RenderResult {
                width: image.width(),
                height: image.height(),
                pixels: image.into_bytes(),
                world_file: compute_world_file(&plan),
                tiles: plan.tile_count(),
            })),
            Err(AssembleError::Cancelled) => JobOutcome::Cancelled(self.cancel_reason()),
            Err(AssembleError::Pool(PoolError::Drained)) => {
                if self.shutdown.is_cancelled() {
                    JobOutcome::Cancelled(CancelReason::Shutdown)
                } else {
                    JobOutcome::Failure(JobFailure::PoolFault("renderer pool was drained".to_string()))
                }
            }
            Err(AssembleError::Pool(PoolError::EngineInit(msg))) => JobOutcome::Failure(JobFailure::EngineInit(msg)),
            Err(AssembleError::Engine(EngineError::Fatal(msg))) => {
                self.registry.discard(&pool);
                JobOutcome::Failure(JobFailure::PoolFault(msg))
            }
            Err(AssembleError::Engine(EngineError::Init(msg))) => JobOutcome::Failure(JobFailure::EngineInit(msg)),
            Err(AssembleError::Engine(EngineError::Render(msg))) => JobOutcome::Failure(JobFailure::Render(msg)),
            Err(e @ (AssembleError::Raster(_) | AssembleError::Task(_))) => {
                JobOutcome::Failure(JobFailure::Render(e.to_string()))
            }
        }
    }

    fn cancel_reason(&self) -> CancelReason {
        if self.shutdown.is_cancelled() {
            CancelReason::Shutdown
        } else {
            CancelReason::ClientGone
        }
    }

    /// Cancel every job, wait up to `grace` for them to settle, then drain
    /// all pools. New submissions resolve as [`CancelReason::Shutdown`].
    pub async fn shutdown(&self, grace: Duration) {
        let jobs = self.active_jobs();
        info!(jobs, "Shutting down render jobs");
        self.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + grace;
        while self.active_jobs() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let destroyed = self.registry.drain_all();
        info!(
            remaining_jobs = self.active_jobs(),
            destroyed, "Render jobs shut down"
        );
    }
}

/// One caller waiting on a job. Dropping it detaches the caller.
struct Subscription {
    manager: Arc<JobManager>,
    key: String,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut table = self.manager.lock();
        // The job may already have settled and been replaced.
        if let Some(entry) = table.get_mut(&self.key).filter(|entry| entry.id == self.id) {
            entry.clients -= 1;
            if entry.clients == 0 {
                entry.cancel.cancel();
                debug!(job_key = %short(&self.key), "Last caller left, cancelling job");
            }
        }
    }
}

/// Removes a job's table entry when the job task ends, however it ends.
struct TableEntry<'a> {
    manager: &'a JobManager,
    key: &'a str,
    id: u64,
}

impl Drop for TableEntry<'_> {
    fn drop(&mut self) {
        let mut table = self.manager.lock();
        if table.get(self.key).map_or(false, |entry| entry.id == self.id) {
            table.remove(self.key);
        }
    }
}

fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}
