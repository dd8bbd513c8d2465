//! Spatial helpers used by the load strategies

pub mod aabb;
pub mod frustum;

pub use aabb::Aabb;
pub use frustum::Frustum;
