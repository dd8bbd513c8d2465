//! View frustum used by the culling load strategy

use crate::core::types::{Mat4, Vec3, Vec4};
use super::aabb::Aabb;

/// View frustum stored as six normalized planes `(normal.xyz, distance)`.
///
/// A point `p` is in front of a plane when `normal.dot(p) + distance >= 0`.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extract frustum planes from a view-projection matrix (Gribb/Hartmann)
    ///
    /// Expects the `[0, 1]` clip depth range produced by glam's `*_rh` projections.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let (r0, r1, r2, r3) = (vp.row(0), vp.row(1), vp.row(2), vp.row(3));
        let planes = [r2, r3 - r2, r3 + r0, r3 - r0, r3 - r1, r3 + r1]
            .map(Self::normalize_plane);
        Self { planes }
    }

    fn normalize_plane(plane: Vec4) -> Vec4 {
        let len = plane.truncate().length();
        if len > 0.0 { plane / len } else { plane }
    }

    fn signed_distance(plane: Vec4, point: Vec3) -> f32 {
        plane.truncate().dot(point) + plane.w
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|&plane| Self::signed_distance(plane, point) >= 0.0)
    }

    /// Conservative box test: false only when the box is fully outside one plane
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes
            .iter()
            .all(|&plane| Self::signed_distance(plane, aabb.support(plane.truncate())) >= 0.0)
    }
}
