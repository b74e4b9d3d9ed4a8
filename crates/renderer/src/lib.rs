//! Pure pieces of the map image pipeline.
//!
//! - Tile planning (splitting a large image into engine-sized tiles)
//! - World file computation (georeferencing the assembled image)
//! - Raster placement (row-wise copy of tiles into the output)
//! - The map engine boundary and a software background engine
//! - PNG encoding

pub mod engine;
pub mod planner;
pub mod png;
pub mod raster;
pub mod world_file;

pub use engine::{BackgroundEngineFactory, EngineError, EngineFactory, MapEngine, TileRenderParams};
pub use planner::{plan, PlanError, PlannedTile, TilingPlan};
pub use raster::{OutputImage, RasterError, RasterTile, CHANNELS};
pub use world_file::{compute_world_file, WorldFile};
