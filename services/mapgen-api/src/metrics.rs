//! Prometheus metric names and recording helpers.

use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const JOBS_STARTED: &str = "mapgen_jobs_started_total";
pub const JOBS_DEDUPLICATED: &str = "mapgen_jobs_deduplicated_total";
pub const JOBS_FINISHED: &str = "mapgen_jobs_finished_total";
pub const RENDER_DURATION: &str = "mapgen_render_duration_seconds";
pub const POOL_INSTANCES: &str = "mapgen_pool_instances";
pub const POOL_EVICTIONS: &str = "mapgen_pool_evictions_total";

/// Install the global Prometheus recorder.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

pub fn record_job_started() {
    counter!(JOBS_STARTED).increment(1);
}

pub fn record_job_deduplicated() {
    counter!(JOBS_DEDUPLICATED).increment(1);
}

pub fn record_job_finished(outcome: &'static str, timer: &Timer) {
    counter!(JOBS_FINISHED, "outcome" => outcome).increment(1);
    histogram!(RENDER_DURATION, "outcome" => outcome).record(timer.elapsed_secs());
}

pub fn record_instances_created(n: usize) {
    gauge!(POOL_INSTANCES).increment(n as f64);
}

pub fn record_instances_destroyed(n: usize) {
    gauge!(POOL_INSTANCES).decrement(n as f64);
}

pub fn record_evictions(n: usize) {
    counter!(POOL_EVICTIONS).increment(n as u64);
}

/// Simple timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_micros() as f64 / 1000.0
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
