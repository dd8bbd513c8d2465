//! Frustum-culled loading: radius rules restricted to what the viewer can see

use super::{LoadStrategy, RadiusStrategy, StrategyContext};
use crate::streaming::tile::{TileCoord, Viewpoint};

/// Bonus added to the priority of tiles inside the view frustum
const VISIBLE_PRIORITY_BONUS: f32 = 100.0;

/// Streams only tiles inside the view frustum, plus a small ring around the
/// viewer that is always kept so turning around never exposes a hole underfoot.
///
/// Viewpoints without a frustum are treated as seeing everything.
#[derive(Clone, Debug)]
pub struct FrustumCullingStrategy {
    radius: RadiusStrategy,
    always_load_radius: f32,
    keep_radius: f32,
    tile_size: f32,
    vertical_extent: (f32, f32),
}

impl FrustumCullingStrategy {
    /// # Arguments
    /// * `radius` - Outer load/unload limits
    /// * `always_load_radius` - Tiles this close load even when out of view
    /// * `keep_radius` - Out-of-view resident tiles are kept up to this distance
    pub fn new(radius: RadiusStrategy, always_load_radius: f32, keep_radius: f32) -> Self {
        Self {
            radius,
            always_load_radius,
            keep_radius: keep_radius.max(always_load_radius),
            tile_size: 1.0,
            vertical_extent: (0.0, 0.0),
        }
    }

    fn is_visible(&self, coord: TileCoord, viewpoint: &Viewpoint, tile_size: f32, extent: (f32, f32)) -> bool {
        match &viewpoint.frustum {
            Some(frustum) => frustum.intersects_aabb(&coord.world_bounds(tile_size, extent.0, extent.1)),
            None => true,
        }
    }
}

impl LoadStrategy for FrustumCullingStrategy {
    fn name(&self) -> &'static str {
        "frustum"
    }

    fn candidate_tiles(&self, viewpoint: &Viewpoint, ctx: &StrategyContext) -> Vec<TileCoord> {
        self.radius.candidate_tiles(viewpoint, ctx)
    }

    fn should_load(&self, coord: TileCoord, viewpoint: &Viewpoint, ctx: &StrategyContext) -> bool {
        if !self.radius.should_load(coord, viewpoint, ctx) {
            return false;
        }
        self.radius.tile_distance(coord, viewpoint, ctx.tile_size) <= self.always_load_radius
            || self.is_visible(coord, viewpoint, ctx.tile_size, ctx.vertical_extent)
    }

    fn should_unload(&self, coord: TileCoord, viewpoint: &Viewpoint, ctx: &StrategyContext) -> bool {
        if self.radius.should_unload(coord, viewpoint, ctx) {
            return true;
        }
        self.radius.tile_distance(coord, viewpoint, ctx.tile_size) > self.keep_radius
            && !self.is_visible(coord, viewpoint, ctx.tile_size, ctx.vertical_extent)
    }

    fn get_load_priority(&self, coord: TileCoord, viewpoint: &Viewpoint) -> f32 {
        let base = self.radius.get_load_priority(coord, viewpoint);
        if self.is_visible(coord, viewpoint, self.tile_size, self.vertical_extent) {
            base + VISIBLE_PRIORITY_BONUS
        } else {
            base
        }
    }

    fn calculate_lod(&self, coord: TileCoord, viewpoint: &Viewpoint, ctx: &StrategyContext) -> u32 {
        self.radius.calculate_lod(coord, viewpoint, ctx)
    }

    fn get_max_operations_per_frame(&self) -> (usize, usize) {
        self.radius.get_max_operations_per_frame()
    }

    fn on_activated(&mut self, ctx: &StrategyContext) {
        self.radius.on_activated(ctx);
        self.tile_size = ctx.tile_size;
        self.vertical_extent = ctx.vertical_extent;
    }

    fn on_deactivated(&mut self) {
        self.radius.on_deactivated();
    }
}
