//! Tile planning.
//!
//! The map engine can only render bounded-size images, so a large request is
//! split into a grid of equally sized sub-images. Each grid cell is rendered
//! centered on its own geographic point and copied into the output buffer at
//! a fixed pixel offset.
//!
//! ## Sizing
//!
//! ```text
//! max_edge     = round(max_tile_size / scale)
//! count_x      = ceil(width / max_edge)          count_y likewise
//! logical_w    = floor(width / count_x)          logical_h likewise
//! physical_w   = floor(logical_w * scale)        physical_h likewise
//! output_w     = physical_w * count_x            output_h likewise
//! ```
//!
//! When the width is not divisible by the tile count the output is a few
//! pixels narrower than requested ("shrink to fit"). Every tile has the same
//! size, so the placement rectangles always cover the output exactly.
//!
//! Output sizes are computed in 64 bits; a plan whose output does not fit a
//! 32-bit edge or [`MAX_OUTPUT_PIXELS`] is refused before any tile is laid out.

use mapgen_common::{LngLat, RenderOptions};
use projection::WebMercatorViewport;
use thiserror::Error;

/// Largest output a plan may describe, in physical pixels.
pub const MAX_OUTPUT_PIXELS: u64 = u32::MAX as u64;

/// Why a request could not be planned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("planned output {width}x{height} exceeds the largest supported image")]
    TooLarge { width: u64, height: u64 },
}

/// One grid cell of a tiling plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTile {
    /// Column index
    pub grid_x: u32,
    /// Row index
    pub grid_y: u32,
    /// Geographic center passed to the engine
    pub center: LngLat,
    /// Logical (pre-scale) size requested from the engine
    pub logical_width: u32,
    pub logical_height: u32,
    /// Size of the raster the engine returns for this cell
    pub physical_width: u32,
    pub physical_height: u32,
    /// Placement in the output buffer, in physical pixels
    pub offset_x: u32,
    pub offset_y: u32,
}

/// Result of planning one request.
#[derive(Debug, Clone, PartialEq)]
pub struct TilingPlan {
    /// Largest logical edge of one engine call
    pub max_edge: u32,
    pub tile_count_x: u32,
    pub tile_count_y: u32,
    pub tile_logical_width: u32,
    pub tile_logical_height: u32,
    pub tile_physical_width: u32,
    pub tile_physical_height: u32,
    /// Assembled image size in physical pixels
    pub output_width: u32,
    pub output_height: u32,
    /// Viewport covering the whole planned area, in logical pixels
    pub viewport: WebMercatorViewport,
    /// Row-major grid cells
    pub tiles: Vec<PlannedTile>,
}

impl TilingPlan {
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Size of the RGBA output buffer in bytes.
    pub fn output_len(&self) -> usize {
        self.output_width as usize * self.output_height as usize * crate::raster::CHANNELS
    }
}

/// Plan the tiles for a request.
///
/// Options must already be validated (positive size and scale). The result is
/// always at least a 1x1 grid. Fails with [`PlanError::TooLarge`] when the
/// output would not fit a 32-bit edge or [`MAX_OUTPUT_PIXELS`].
pub fn plan(options: &RenderOptions, max_tile_size: u32) -> Result<TilingPlan, PlanError> {
    let max_edge = ((max_tile_size as f64 / options.scale).round() as u32).max(1);

    let tile_count_x = options.width.div_ceil(max_edge).max(1);
    let tile_count_y = options.height.div_ceil(max_edge).max(1);

    let tile_logical_width = (options.width / tile_count_x).max(1);
    let tile_logical_height = (options.height / tile_count_y).max(1);

    // Float to int casts saturate
    let physical_width = (tile_logical_width as f64 * options.scale).floor() as u64;
    let physical_height = (tile_logical_height as f64 * options.scale).floor() as u64;

    let output_width = physical_width.checked_mul(tile_count_x as u64);
    let output_height = physical_height.checked_mul(tile_count_y as u64);
    let (output_width, output_height) = match (output_width, output_height) {
        (Some(w), Some(h))
            if w <= u32::MAX as u64
                && h <= u32::MAX as u64
                && w.saturating_mul(h) <= MAX_OUTPUT_PIXELS =>
        {
            (w as u32, h as u32)
        }
        (w, h) => {
            return Err(PlanError::TooLarge {
                width: w.unwrap_or(u64::MAX),
                height: h.unwrap_or(u64::MAX),
            })
        }
    };
    // Bounded by the output edges checked above
    let tile_physical_width = physical_width as u32;
    let tile_physical_height = physical_height as u32;

    let viewport = WebMercatorViewport::new(
        options.center,
        options.zoom,
        (tile_logical_width * tile_count_x) as f64,
        (tile_logical_height * tile_count_y) as f64,
    );

    let mut tiles = Vec::with_capacity(tile_count_x as usize * tile_count_y as usize);
    for y in 0..tile_count_y {
        for x in 0..tile_count_x {
            let center_x = x as f64 * tile_logical_width as f64 + tile_logical_width as f64 / 2.0;
            let center_y = y as f64 * tile_logical_height as f64 + tile_logical_height as f64 / 2.0;
            tiles.push(PlannedTile {
                grid_x: x,
                grid_y: y,
                center: viewport.unproject(center_x, center_y),
                logical_width: tile_logical_width,
                logical_height: tile_logical_height,
                physical_width: tile_physical_width,
                physical_height: tile_physical_height,
                offset_x: x * tile_physical_width,
                offset_y: y * tile_physical_height,
            });
        }
    }

    Ok(TilingPlan {
        max_edge,
        tile_count_x,
        tile_count_y,
        tile_logical_width,
        tile_logical_height,
        tile_physical_width,
        tile_physical_height,
        output_width,
        output_height,
        viewport,
        tiles,
    })
}
