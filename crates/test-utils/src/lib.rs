//! Shared test utilities for the mapgen workspace.
//!
//! This crate provides:
//! - An instrumented engine double ([`CountingEngineFactory`])
//! - Bounded-time async assertions ([`wait_until`])
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../../crates/test-utils" }
//! ```

pub mod engine;
pub mod wait;

pub use engine::{CountingEngineFactory, EngineCounters};
pub use wait::wait_until;
