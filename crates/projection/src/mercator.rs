//! Web Mercator (EPSG:3857) viewport.
//!
//! A viewport maps geographic coordinates to pixel coordinates of an image of
//! a given size, centered on a point at a given zoom. Pixel (0, 0) is the
//! top-left corner and Y grows downward.
//!
//! The world is `TILE_SIZE * 2^zoom` pixels wide, matching the map engine's
//! 512 px tile convention, so a zoom level means the same thing to the
//! planner and to the engine.

use std::f64::consts::PI;

use mapgen_common::LngLat;

/// World size in pixels at zoom 0.
pub const TILE_SIZE: f64 = 512.0;

/// WGS84 semi-major axis used by EPSG:3857 (meters).
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// A Web Mercator viewport without pitch or bearing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WebMercatorViewport {
    pub center: LngLat,
    pub zoom: f64,
    /// Viewport width in logical pixels
    pub width: f64,
    /// Viewport height in logical pixels
    pub height: f64,
    world_size: f64,
    center_x: f64,
    center_y: f64,
}

impl WebMercatorViewport {
    pub fn new(center: LngLat, zoom: f64, width: f64, height: f64) -> Self {
        let world_size = TILE_SIZE * 2f64.powf(zoom);
        let (center_x, center_y) = project_flat(center, world_size);
        Self {
            center,
            zoom,
            width,
            height,
            world_size,
            center_x,
            center_y,
        }
    }

    /// World size in pixels at this zoom.
    pub fn world_size(&self) -> f64 {
        self.world_size
    }

    /// Geographic coordinate to viewport pixel.
    pub fn project(&self, lnglat: LngLat) -> (f64, f64) {
        let (x, y) = project_flat(lnglat, self.world_size);
        (
            x - self.center_x + self.width / 2.0,
            y - self.center_y + self.height / 2.0,
        )
    }

    /// Viewport pixel to geographic coordinate.
    pub fn unproject(&self, x: f64, y: f64) -> LngLat {
        let world_x = x - self.width / 2.0 + self.center_x;
        let world_y = y - self.height / 2.0 + self.center_y;
        unproject_flat(world_x, world_y, self.world_size)
    }
}

fn project_flat(lnglat: LngLat, world_size: f64) -> (f64, f64) {
    let lambda = lnglat.lon.to_radians();
    let phi = lnglat.lat.to_radians();
    let x = world_size * (lambda + PI) / (2.0 * PI);
    let y = world_size * (PI - (PI / 4.0 + phi / 2.0).tan().ln()) / (2.0 * PI);
    (x, y)
}

fn unproject_flat(x: f64, y: f64, world_size: f64) -> LngLat {
    let lambda = x / world_size * 2.0 * PI - PI;
    let phi = 2.0 * (PI - y / world_size * 2.0 * PI).exp().atan() - PI / 2.0;
    LngLat::new(lambda.to_degrees(), phi.to_degrees())
}

/// Geographic coordinate to EPSG:3857 meters.
pub fn lnglat_to_meters(lnglat: LngLat) -> (f64, f64) {
    let x = EARTH_RADIUS * lnglat.lon.to_radians();
    let y = EARTH_RADIUS * (PI / 4.0 + lnglat.lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// EPSG:3857 meters to geographic coordinate.
pub fn meters_to_lnglat(x: f64, y: f64) -> LngLat {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    LngLat::new(lon, lat)
}
