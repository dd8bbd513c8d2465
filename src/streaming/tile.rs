//! Tile identity, payloads and viewpoints
//!
//! A tile is a fixed-size square of the generated surface. Tile `(x, y)` covers
//! world X in `[x * size, (x + 1) * size)` and world Z in `[y * size, (y + 1) * size)`.

use std::fmt;

use crate::core::types::{Vec2, Vec3};
use crate::math::{Aabb, Frustum};

/// Integer grid coordinate of a tile
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Tile containing a world-space position (Y is ignored)
    pub fn from_world_pos(pos: Vec3, tile_size: f32) -> Self {
        Self {
            x: (pos.x / tile_size).floor() as i32,
            y: (pos.z / tile_size).floor() as i32,
        }
    }

    /// World-space XZ center of the tile
    pub fn world_center(&self, tile_size: f32) -> Vec2 {
        Vec2::new(
            (self.x as f32 + 0.5) * tile_size,
            (self.y as f32 + 0.5) * tile_size,
        )
    }

    /// Bounding box of the tile with the given vertical extent
    pub fn world_bounds(&self, tile_size: f32, min_height: f32, max_height: f32) -> Aabb {
        let origin = Vec3::new(self.x as f32 * tile_size, min_height, self.y as f32 * tile_size);
        Aabb::new(origin, Vec3::new(origin.x + tile_size, max_height, origin.z + tile_size))
    }

    /// Euclidean distance to another tile, in tiles
    pub fn tile_distance(&self, other: TileCoord) -> f32 {
        // Widened so tiles at opposite ends of the i32 range do not overflow
        let dx = (i64::from(self.x) - i64::from(other.x)) as f32;
        let dy = (i64::from(self.y) - i64::from(other.y)) as f32;
        Vec2::new(dx, dy).length()
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Cache and queue key: a tile at a given level of detail (0 = finest)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub coord: TileCoord,
    pub lod: u32,
}

impl TileKey {
    pub fn new(coord: TileCoord, lod: u32) -> Self {
        Self { coord, lod }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@lod{}", self.coord, self.lod)
    }
}

/// Inclusive rectangle of tile coordinates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileBounds {
    pub min: TileCoord,
    pub max: TileCoord,
}

impl TileBounds {
    pub fn new(min: TileCoord, max: TileCoord) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        coord.x >= self.min.x && coord.x <= self.max.x
            && coord.y >= self.min.y && coord.y <= self.max.y
    }
}

/// Generated tile content plus the size estimate used for cache accounting.
///
/// Payloads are immutable once produced and are shared as `Arc<TilePayload<T>>`
/// between the cache, the in-flight request and the resident set.
#[derive(Debug)]
pub struct TilePayload<T> {
    pub content: T,
    pub size_bytes: usize,
}

impl<T> TilePayload<T> {
    pub fn new(content: T, size_bytes: usize) -> Self {
        Self { content, size_bytes }
    }
}

/// Observer position and optional view volume for one frame
#[derive(Clone, Copy, Debug)]
pub struct Viewpoint {
    pub position: Vec3,
    pub frustum: Option<Frustum>,
}

impl Viewpoint {
    pub fn at(position: Vec3) -> Self {
        Self { position, frustum: None }
    }

    pub fn with_frustum(mut self, frustum: Frustum) -> Self {
        self.frustum = Some(frustum);
        self
    }

    /// Horizontal distance from the viewpoint to a tile center, in world units
    pub fn distance_to(&self, coord: TileCoord, tile_size: f32) -> f32 {
        let eye = Vec2::new(self.position.x, self.position.z);
        eye.distance(coord.world_center(tile_size))
    }
}
