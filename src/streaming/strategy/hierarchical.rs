//! Hierarchical loading driven by the LOD bands
//!
//! Instead of a fixed radius, the loaded footprint follows the LOD distance
//! bands: fine tiles near the viewer, progressively coarser ones further out,
//! up to a reach derived from the outermost band. Fine detail is always
//! requested before coarse detail.

use super::{LoadStrategy, StrategyContext};
use crate::streaming::lod::{lod_from_distance, max_lod};
use crate::streaming::tile::{TileCoord, Viewpoint};

/// Weight that ranks every finer LOD ahead of any coarser one
const LOD_PRIORITY_WEIGHT: f32 = 1000.0;

#[derive(Clone, Debug)]
pub struct HierarchicalStrategy {
    /// Reach as a multiple of the outermost LOD threshold
    reach_factor: f32,
    /// Extra margin beyond the reach before tiles are dropped (fraction of reach)
    unload_margin: f32,
    budget: Option<(usize, usize)>,

    // Cached on activation
    bands: Vec<f32>,
    tile_size: f32,
    reach: f32,
    default_budget: (usize, usize),
}

impl HierarchicalStrategy {
    /// # Arguments
    /// * `reach_factor` - Load distance as a multiple of the last LOD threshold (>= 1.0)
    /// * `unload_margin` - Fractional margin beyond the reach before unloading
    pub fn new(reach_factor: f32, unload_margin: f32) -> Self {
        Self {
            reach_factor: reach_factor.max(1.0),
            unload_margin: unload_margin.max(0.0),
            budget: None,
            bands: Vec::new(),
            tile_size: 1.0,
            reach: 0.0,
            default_budget: (16, 32),
        }
    }

    pub fn with_budget(mut self, max_loads: usize, max_unloads: usize) -> Self {
        self.budget = Some((max_loads, max_unloads));
        self
    }

    /// Load distance in world units (valid after activation)
    pub fn reach(&self) -> f32 {
        self.reach
    }

    fn compute_reach(bands: &[f32], tile_size: f32, reach_factor: f32) -> f32 {
        let outer = bands.last().copied().unwrap_or(tile_size);
        outer * reach_factor
    }
}

impl Default for HierarchicalStrategy {
    fn default() -> Self {
        Self::new(1.5, 0.1)
    }
}

impl LoadStrategy for HierarchicalStrategy {
    fn name(&self) -> &'static str {
        "hierarchical"
    }

    fn candidate_tiles(&self, viewpoint: &Viewpoint, ctx: &StrategyContext) -> Vec<TileCoord> {
        let reach = Self::compute_reach(&ctx.lod_distances, ctx.tile_size, self.reach_factor);
        ctx.tiles_around(viewpoint, reach / ctx.tile_size)
    }

    fn should_load(&self, coord: TileCoord, viewpoint: &Viewpoint, ctx: &StrategyContext) -> bool {
        let reach = Self::compute_reach(&ctx.lod_distances, ctx.tile_size, self.reach_factor);
        ctx.in_world(coord) && viewpoint.distance_to(coord, ctx.tile_size) <= reach
    }

    fn should_unload(&self, coord: TileCoord, viewpoint: &Viewpoint, ctx: &StrategyContext) -> bool {
        let reach = Self::compute_reach(&ctx.lod_distances, ctx.tile_size, self.reach_factor);
        !ctx.in_world(coord)
            || viewpoint.distance_to(coord, ctx.tile_size) > reach * (1.0 + self.unload_margin)
    }

    fn get_load_priority(&self, coord: TileCoord, viewpoint: &Viewpoint) -> f32 {
        let distance = viewpoint.distance_to(coord, self.tile_size);
        let lod = lod_from_distance(distance, &self.bands);
        1.0 / (1.0 + lod as f32 * LOD_PRIORITY_WEIGHT + distance)
    }

    fn calculate_lod(&self, coord: TileCoord, viewpoint: &Viewpoint, ctx: &StrategyContext) -> u32 {
        let distance = viewpoint.distance_to(coord, ctx.tile_size);
        lod_from_distance(distance, &ctx.lod_distances).min(max_lod(&ctx.lod_distances))
    }

    fn get_max_operations_per_frame(&self) -> (usize, usize) {
        self.budget.unwrap_or(self.default_budget)
    }

    fn on_activated(&mut self, ctx: &StrategyContext) {
        self.bands = ctx.lod_distances.clone();
        self.tile_size = ctx.tile_size;
        self.reach = Self::compute_reach(&self.bands, self.tile_size, self.reach_factor);
        self.default_budget = ctx.default_budget;
        log::debug!(
            "Hierarchical strategy activated: {} bands, reach {:.0}",
            self.bands.len(), self.reach
        );
    }

    fn on_deactivated(&mut self) {
        self.bands.clear();
        self.reach = 0.0;
    }
}
