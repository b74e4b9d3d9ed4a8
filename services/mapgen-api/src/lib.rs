//! Map image generation service.
//!
//! Renders arbitrarily large map images by splitting them into engine-sized
//! tiles, rendering the tiles on a bounded pool of engine instances, and
//! stitching the results. Identical concurrent requests share one render.

pub mod assembler;
pub mod eviction;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod state;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Extension},
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use jobs::{CancelReason, JobFailure, JobManager, JobOutcome, RenderResult};
pub use pool::{PoolConfig, PoolError, PooledRenderer, RendererPool};
pub use registry::{EvictionPolicy, PoolRegistry};
pub use state::AppState;

/// Largest accepted request body. Style documents can be large.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/generateImage", post(handlers::generate_image_handler))
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/pools", get(handlers::pools_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
