//! lanepost - merge per-lane session logs and publish experiments
//!
//! This library crate exposes internal modules for integration testing.

pub mod config;
pub mod data;
pub mod integrations;
pub mod session;
pub mod submit;
pub mod util;
