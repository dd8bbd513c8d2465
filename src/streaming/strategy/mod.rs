//! Pluggable load strategies
//!
//! A strategy answers pure questions about tiles relative to a viewpoint:
//! should this tile be resident, how urgent is it, which LOD should it use,
//! and how much work may a frame issue. The controller owns all mechanics
//! (queues, budgets, hysteresis), so strategies can be swapped freely.

pub mod radius;
pub mod frustum;
pub mod hierarchical;

pub use radius::RadiusStrategy;
pub use frustum::FrustumCullingStrategy;
pub use hierarchical::HierarchicalStrategy;

use super::config::StreamingConfig;
use super::tile::{TileBounds, TileCoord, Viewpoint};

/// Shared spatial metadata handed to strategies
#[derive(Clone, Debug, PartialEq)]
pub struct StrategyContext {
    /// Edge length of a tile in world units
    pub tile_size: f32,
    /// Ascending LOD distance thresholds
    pub lod_distances: Vec<f32>,
    /// Height range used for tile bounding boxes
    pub vertical_extent: (f32, f32),
    /// Tiles outside these bounds are never loaded
    pub world_bounds: Option<TileBounds>,
    /// Per-frame `(loads, unloads)` for strategies without their own budget
    pub default_budget: (usize, usize),
}

impl StrategyContext {
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            tile_size: config.tile_size,
            lod_distances: config.lod_distances.clone(),
            vertical_extent: (config.vertical_extent[0], config.vertical_extent[1]),
            world_bounds: config.world_bounds.map(|[min_x, min_y, max_x, max_y]| {
                TileBounds::new(TileCoord::new(min_x, min_y), TileCoord::new(max_x, max_y))
            }),
            default_budget: (config.max_loads_per_frame, config.max_unloads_per_frame),
        }
    }

    pub fn in_world(&self, coord: TileCoord) -> bool {
        self.world_bounds.is_none_or(|bounds| bounds.contains(coord))
    }

    /// Tiles in the square of the given radius (in tiles) around the viewpoint's tile
    pub fn tiles_around(&self, viewpoint: &Viewpoint, radius: f32) -> Vec<TileCoord> {
        let center = TileCoord::from_world_pos(viewpoint.position, self.tile_size);
        let r = radius.max(0.0).ceil() as i32;
        let mut tiles = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
        for dy in -r..=r {
            for dx in -r..=r {
                let (Some(x), Some(y)) = (center.x.checked_add(dx), center.y.checked_add(dy)) else {
                    continue;
                };
                let coord = TileCoord::new(x, y);
                if self.in_world(coord) {
                    tiles.push(coord);
                }
            }
        }
        tiles
    }
}

/// Decision policy for which tiles to stream and at what detail
pub trait LoadStrategy: Send {
    /// Short identifier for logs
    fn name(&self) -> &'static str;

    /// Tiles to consider for loading this frame
    fn candidate_tiles(&self, viewpoint: &Viewpoint, ctx: &StrategyContext) -> Vec<TileCoord>;

    fn should_load(&self, coord: TileCoord, viewpoint: &Viewpoint, ctx: &StrategyContext) -> bool;

    /// Must be false whenever `should_load` is true for the same inputs
    fn should_unload(&self, coord: TileCoord, viewpoint: &Viewpoint, ctx: &StrategyContext) -> bool;

    /// Load urgency; higher values load first
    fn get_load_priority(&self, coord: TileCoord, viewpoint: &Viewpoint) -> f32;

    /// Desired LOD ignoring hysteresis
    fn calculate_lod(&self, coord: TileCoord, viewpoint: &Viewpoint, ctx: &StrategyContext) -> u32;

    /// `(max_loads, max_unloads)` per frame
    fn get_max_operations_per_frame(&self) -> (usize, usize);

    /// Called when the strategy is installed on a controller
    fn on_activated(&mut self, _ctx: &StrategyContext) {}

    /// Called when the strategy is replaced or the controller shuts down
    fn on_deactivated(&mut self) {}
}
