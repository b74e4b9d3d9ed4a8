//! Coordinate transformations for map rendering.
//!
//! Implements the Web Mercator projection from scratch without external dependencies.

pub mod mercator;

pub use mercator::{lnglat_to_meters, meters_to_lnglat, WebMercatorViewport, EARTH_RADIUS, TILE_SIZE};
