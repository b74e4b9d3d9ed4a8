//! Common types and utilities shared across the map generator crates.

pub mod config;
pub mod error;
pub mod request;

pub use config::RenderConfig;
pub use error::{MapGenError, MapGenResult};
pub use request::{job_key, LngLat, RenderOptions, RenderRequest, StyleDocument};
