//! World file (georeference) computation.
//!
//! A world file is the six-parameter affine transform from image pixel
//! coordinates to projected (EPSG:3857) coordinates. It is emitted as
//! `pixelWidth|0|0|pixelHeight|centerX|centerY|`, where the last two values
//! are the projected center of the top-left pixel.

use projection::lnglat_to_meters;

use crate::planner::TilingPlan;

/// Affine parameters of an assembled image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldFile {
    /// Meters per pixel along X
    pub pixel_width: f64,
    /// Meters per pixel along Y (negative: image Y grows down, northing up)
    pub pixel_height: f64,
    /// Projected X of the top-left pixel center
    pub origin_x: f64,
    /// Projected Y of the top-left pixel center
    pub origin_y: f64,
}

impl WorldFile {
    /// Derive the world file for a plan's output image.
    ///
    /// Degenerate plans yield meaningless numbers; inputs are validated before
    /// planning.
    pub fn from_plan(plan: &TilingPlan) -> Self {
        let viewport = &plan.viewport;
        let top_left = viewport.unproject(0.0, 0.0);
        let bottom_right = viewport.unproject(viewport.width, viewport.height);

        let (left, top) = lnglat_to_meters(top_left);
        let (right, bottom) = lnglat_to_meters(bottom_right);

        let pixel_width = (right - left) / plan.output_width as f64;
        let pixel_height = (bottom - top) / plan.output_height as f64;

        Self {
            pixel_width,
            pixel_height,
            origin_x: left + pixel_width / 2.0,
            origin_y: top + pixel_height / 2.0,
        }
    }
}

impl std::fmt::Display for WorldFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}|0|0|{}|{}|{}|",
            self.pixel_width, self.pixel_height, self.origin_x, self.origin_y
        )
    }
}

/// World file string for a plan.
pub fn compute_world_file(plan: &TilingPlan) -> String {
    WorldFile::from_plan(plan).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan;
    use mapgen_common::{LngLat, RenderOptions};

    #[test]
    fn test_pixel_height_is_negative() {
        let p = plan(&RenderOptions::default(), 1000).unwrap();
        let wf = WorldFile::from_plan(&p);
        assert!(wf.pixel_width > 0.0);
        assert!(wf.pixel_height < 0.0);
    }

    #[test]
    fn test_equator_pixel_size_matches_resolution() {
        // At zoom 0 the 512 px world spans 2 * pi * R meters.
        let options = RenderOptions {
            center: LngLat::new(0.0, 0.0),
            zoom: 0.0,
            width: 256,
            height: 256,
            ..RenderOptions::default()
        };
        let wf = WorldFile::from_plan(&plan(&options, 1000).unwrap());
        let expected = 2.0 * std::f64::consts::PI * projection::EARTH_RADIUS / 512.0;
        assert!((wf.pixel_width - expected).abs() < 1e-6);
        assert!((wf.pixel_height + expected).abs() < 1e-6);
        // Top-left pixel center sits half a pixel inside the image corner
        assert!((wf.origin_x - (-128.0 * expected + expected / 2.0)).abs() < 1e-6);
        assert!((wf.origin_y - (128.0 * expected - expected / 2.0)).abs() < 1e-6);
    }

    #[test]
    fn test_scale_shrinks_pixel_size() {
        let base = RenderOptions::default();
        let hidpi = RenderOptions {
            scale: 2.0,
            ..RenderOptions::default()
        };
        let a = WorldFile::from_plan(&plan(&base, 1000).unwrap());
        let b = WorldFile::from_plan(&plan(&hidpi, 1000).unwrap());
        assert!((a.pixel_width / b.pixel_width - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_string_format() {
        let wf = WorldFile {
            pixel_width: 1.5,
            pixel_height: -1.5,
            origin_x: 100.0,
            origin_y: 200.25,
        };
        assert_eq!(wf.to_string(), "1.5|0|0|-1.5|100|200.25|");
    }
}
