//! Terrastream - tile streaming and LOD management for procedurally generated surfaces

pub mod core;
pub mod math;
pub mod streaming;
