//! Raster tiles and the assembled output buffer.

use thiserror::Error;

use crate::planner::{PlannedTile, TilingPlan};

/// Bytes per pixel (RGBA8).
pub const CHANNELS: usize = 4;

/// Raw RGBA pixels returned by the engine for one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterTile {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RasterTile {
    /// Wrap engine output, checking the buffer length against the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, RasterError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(RasterError::BadLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    /// A tile filled with one color.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba.repeat(width as usize * height as usize);
        Self { data, width, height }
    }

    fn row(&self, r: usize, width: usize) -> &[u8] {
        let start = r * self.width as usize * CHANNELS;
        &self.data[start..start + width * CHANNELS]
    }
}

/// Errors while placing tiles into the output.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RasterError {
    #[error("raster length {actual} does not match dimensions (expected {expected})")]
    BadLength { expected: usize, actual: usize },

    #[error("tile ({grid_x}, {grid_y}) returned {actual_width}x{actual_height}, expected at least {width}x{height}")]
    TooSmall {
        grid_x: u32,
        grid_y: u32,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("tile ({grid_x}, {grid_y}) does not fit in the {width}x{height} output")]
    OutOfBounds {
        grid_x: u32,
        grid_y: u32,
        width: u32,
        height: u32,
    },
}

/// The assembled RGBA image.
///
/// Starts zeroed (transparent). It is only handed out once every tile has
/// been written, so callers never see a partially filled buffer.
#[derive(Debug)]
pub struct OutputImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl OutputImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0; width as usize * height as usize * CHANNELS],
            width,
            height,
        }
    }

    pub fn for_plan(plan: &TilingPlan) -> Self {
        Self::new(plan.output_width, plan.output_height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Copy a rendered tile into its region.
    ///
    /// The copy goes row by row: a tile is narrower than the output, so one
    /// contiguous copy would spill each tile row into the next tile's area.
    /// Pixels the engine returned beyond the planned physical size are
    /// ignored.
    pub fn write_tile(&mut self, tile: &PlannedTile, raster: &RasterTile) -> Result<(), RasterError> {
        if raster.width < tile.physical_width || raster.height < tile.physical_height {
            return Err(RasterError::TooSmall {
                grid_x: tile.grid_x,
                grid_y: tile.grid_y,
                width: tile.physical_width,
                height: tile.physical_height,
                actual_width: raster.width,
                actual_height: raster.height,
            });
        }
        if tile.offset_x + tile.physical_width > self.width
            || tile.offset_y + tile.physical_height > self.height
        {
            return Err(RasterError::OutOfBounds {
                grid_x: tile.grid_x,
                grid_y: tile.grid_y,
                width: self.width,
                height: self.height,
            });
        }

        let row_bytes = tile.physical_width as usize * CHANNELS;
        let out_stride = self.width as usize * CHANNELS;
        for r in 0..tile.physical_height as usize {
            let dst = (tile.offset_y as usize + r) * out_stride + tile.offset_x as usize * CHANNELS;
            self.data[dst..dst + row_bytes]
                .copy_from_slice(raster.row(r, tile.physical_width as usize));
        }
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan;
    use mapgen_common::RenderOptions;

    fn pixel(img: &OutputImage, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * img.width() as usize + x as usize) * CHANNELS;
        let b = img.as_bytes();
        [b[i], b[i + 1], b[i + 2], b[i + 3]]
    }

    #[test]
    fn test_rows_land_in_own_column() {
        let options = RenderOptions {
            width: 30,
            height: 10,
            ..RenderOptions::default()
        };
        let p = plan(&options, 10).unwrap();
        let mut img = OutputImage::for_plan(&p);

        for (i, tile) in p.tiles.iter().enumerate() {
            let raster = RasterTile::filled(tile.physical_width, tile.physical_height, [i as u8 + 1, 0, 0, 255]);
            img.write_tile(tile, &raster).unwrap();
        }

        for y in 0..10 {
            assert_eq!(pixel(&img, 0, y)[0], 1);
            assert_eq!(pixel(&img, 9, y)[0], 1);
            assert_eq!(pixel(&img, 10, y)[0], 2);
            assert_eq!(pixel(&img, 29, y)[0], 3);
        }
    }

    #[test]
    fn test_undersized_raster_rejected() {
        let p = plan(&RenderOptions { width: 20, height: 20, ..RenderOptions::default() }, 10).unwrap();
        let mut img = OutputImage::for_plan(&p);
        let raster = RasterTile::filled(5, 10, [0, 0, 0, 255]);
        assert!(matches!(
            img.write_tile(&p.tiles[0], &raster),
            Err(RasterError::TooSmall { .. })
        ));
    }

    #[test]
    fn test_bad_length_rejected() {
        assert!(RasterTile::new(vec![0; 10], 2, 2).is_err());
        assert!(RasterTile::new(vec![0; 16], 2, 2).is_ok());
    }
}
