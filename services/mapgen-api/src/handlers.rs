//! HTTP handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use mapgen_common::{MapGenError, RenderRequest};
use renderer::png;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::state::AppState;

/// Response header carrying the world file of a generated image.
pub static WORLD_FILE_HEADER: HeaderName = HeaderName::from_static("world-file");

/// Error response: status from [`MapGenError::http_status_code`] and a
/// `{ "error": <reason>, "message": <text> }` body.
#[derive(Debug)]
pub struct ApiError(pub MapGenError);

impl From<MapGenError> for ApiError {
    fn from(err: MapGenError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(reason = self.0.reason(), error = %self.0, "Request failed");
        } else {
            debug!(reason = self.0.reason(), error = %self.0, "Request rejected");
        }
        let body = json!({
            "error": self.0.reason(),
            "message": self.0.to_string(),
        });
        (
            status,
            [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
            Json(body),
        )
            .into_response()
    }
}

// ============================================================================
// Image generation
// ============================================================================

/// POST /generateImage - render a map image
///
/// Body: `{ "options": { center, width, height, zoom, scale, pitch, bearing }, "style": {...} }`.
/// Every field is optional. Responds with a PNG and its `World-File` header.
#[instrument(skip(state, body), fields(body_bytes = body.len()))]
pub async fn generate_image_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    // An empty body renders the defaults
    let request: RenderRequest = if body.is_empty() {
        RenderRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(MapGenError::from)?
    };
    let result = state.render(request).await?;

    let world_file = result.world_file.clone();
    let (width, height) = (result.width as usize, result.height as usize);
    let png = tokio::task::spawn_blocking(move || png::create_png(&result.pixels, width, height))
        .await
        .map_err(|e| MapGenError::InternalError(format!("encode task failed: {}", e)))?
        .map_err(MapGenError::EncodeError)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*".to_string()),
            (WORLD_FILE_HEADER.clone(), world_file),
        ],
        png,
    )
        .into_response())
}

// ============================================================================
// Health and metrics
// ============================================================================

/// GET /health - Basic health check
pub async fn health_handler(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    if state.jobs.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "Shutting down")
    } else {
        (StatusCode::OK, "OK")
    }
}

/// GET /metrics - Prometheus metrics endpoint
pub async fn metrics_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Metrics recorder not installed").into_response(),
    }
}

/// GET /api/pools - renderer pool and job table statistics
pub async fn pools_handler(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.jobs.registry();
    Json(json!({
        "active_jobs": state.jobs.active_jobs(),
        "pool_max_instances": registry.config().max_instances,
        "pool_min_instances": registry.config().min_instances,
        "pools": registry.stats(),
    }))
}
