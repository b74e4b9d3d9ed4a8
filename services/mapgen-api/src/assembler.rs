//! Image assembly: render every planned tile and place it in the output.
//!
//! Tiles are rendered concurrently, each on its own pooled engine, so the
//! pool size bounds the parallelism. Rendered rasters are written into the
//! output by the assembling task as they arrive; regions never overlap, so
//! arrival order does not matter.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use mapgen_common::RenderOptions;
use renderer::{EngineError, OutputImage, RasterError, RasterTile, TileRenderParams, TilingPlan};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pool::{PoolError, RendererPool};

/// Why an assembly produced no image.
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("assembly cancelled")]
    Cancelled,

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error("render task failed: {0}")]
    Task(String),
}

/// Render all tiles of `plan` and assemble them.
///
/// `cancel` is checked before acquiring an engine, before each render call,
/// and after each render returns. On the first error or on cancellation the
/// remaining tiles are abandoned and no image is returned; a tile error is
/// reported as itself, never as a cancellation. Engines already
/// checked out are released as their in-progress renders finish.
pub async fn assemble(
    plan: &TilingPlan,
    options: &RenderOptions,
    pool: &Arc<RendererPool>,
    cancel: &CancellationToken,
) -> Result<OutputImage, AssembleError> {
    // Siblings stop as soon as one tile fails.
    let abort = cancel.child_token();
    let _abort_on_exit = abort.clone().drop_guard();

    let mut tasks: FuturesUnordered<_> = plan
        .tiles
        .iter()
        .enumerate()
        .map(|(index, tile)| {
            let params = TileRenderParams::for_tile(options, tile);
            render_tile(index, params, pool, &abort)
        })
        .collect();

    let mut image = OutputImage::for_plan(plan);
    let mut written = 0usize;

    while let Some(result) = tasks.next().await {
        if cancel.is_cancelled() {
            return Err(AssembleError::Cancelled);
        }
        match result {
            // A sibling failed; its error is still on the way.
            Ok(_) if abort.is_cancelled() => continue,
            Err(AssembleError::Cancelled) => continue,
            Ok((index, raster)) => {
                image.write_tile(&plan.tiles[index], &raster)?;
                written += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if cancel.is_cancelled() || abort.is_cancelled() {
        return Err(AssembleError::Cancelled);
    }

    debug!(tiles = written, width = image.width(), height = image.height(), "Assembled image");
    Ok(image)
}

async fn render_tile(
    index: usize,
    params: TileRenderParams,
    pool: &Arc<RendererPool>,
    cancel: &CancellationToken,
) -> Result<(usize, RasterTile), AssembleError> {
    if cancel.is_cancelled() {
        return Err(AssembleError::Cancelled);
    }

    let mut renderer = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(AssembleError::Cancelled),
        acquired = pool.acquire() => acquired?,
    };

    let blocking_cancel = cancel.clone();
    let raster = tokio::task::spawn_blocking(move || {
        if blocking_cancel.is_cancelled() {
            return Err(AssembleError::Cancelled);
        }
        let result = renderer.render(&params);
        if result.is_err() {
            // Stop siblings before the engine goes back to a waiting one
            blocking_cancel.cancel();
        }
        // Release before reporting so the engine is back in the pool even
        // when nobody is waiting for this result any more.
        drop(renderer);
        result.map_err(AssembleError::from)
    })
    .await
    .map_err(|e| AssembleError::Task(e.to_string()))??;

    if cancel.is_cancelled() {
        return Err(AssembleError::Cancelled);
    }
    Ok((index, raster))
}
