//! Application state and lifecycle.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mapgen_common::{MapGenError, MapGenResult, RenderConfig, RenderRequest, StyleDocument};
use metrics_exporter_prometheus::PrometheusHandle;
use renderer::EngineFactory;
use tracing::{info, warn};

use crate::eviction::EvictionTask;
use crate::jobs::{JobManager, RenderResult};
use crate::pool::PoolConfig;
use crate::registry::PoolRegistry;

/// Background colour of the built-in style.
pub const BUILTIN_BACKGROUND: &str = "#f8f4f0";

/// Shared application state.
pub struct AppState {
    pub config: RenderConfig,
    pub jobs: Arc<JobManager>,
    pub default_style: Arc<StyleDocument>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: RenderConfig,
        factory: Arc<dyn EngineFactory>,
        default_style: StyleDocument,
    ) -> MapGenResult<Self> {
        config.validate()?;

        let registry = Arc::new(PoolRegistry::new(factory, PoolConfig::from_render_config(&config)));
        let jobs = JobManager::new(registry, config.clone());

        Ok(Self {
            config,
            jobs,
            default_style: Arc::new(default_style),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Validate a request, fill in the default style and render it.
    pub async fn render(&self, request: RenderRequest) -> MapGenResult<Arc<RenderResult>> {
        let (options, style) = request.into_parts(&self.default_style);
        options.validate(self.config.max_image_edge)?;
        self.jobs.submit(options, style).await.into_result()
    }

    /// Pin the default style's pool and pre-create its minimum engines.
    pub async fn warm_default_pool(&self) {
        let pool = match self.jobs.registry().pin(&self.default_style, 1.0) {
            Ok(pool) => pool,
            Err(e) => {
                warn!(error = %e, "Cannot warm default pool");
                return;
            }
        };
        match pool.warm(self.config.pool_min_instances).await {
            Ok(n) => info!(instances = n, "Warmed default renderer pool"),
            Err(e) => warn!(error = %e, "Warming default renderer pool failed"),
        }
    }

    pub fn eviction_task(&self) -> EvictionTask {
        EvictionTask::new(
            self.jobs.registry().clone(),
            self.config.eviction_interval(),
            self.config.pool_idle_timeout(),
        )
    }

    /// Cancel in-flight jobs and drain every pool.
    pub async fn shutdown(&self, grace: Duration) {
        self.jobs.shutdown(grace).await;
    }
}

/// Load the default style from `path`, or use a background-only style.
pub fn load_default_style(path: Option<&Path>) -> MapGenResult<StyleDocument> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                MapGenError::InvalidStyle(format!("cannot read {}: {}", path.display(), e))
            })?;
            let style = StyleDocument::from_json(&text)?;
            info!(path = %path.display(), "Loaded default style");
            Ok(style)
        }
        None => Ok(StyleDocument::background_only(BUILTIN_BACKGROUND)),
    }
}
