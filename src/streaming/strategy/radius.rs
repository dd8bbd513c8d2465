//! Radius-based loading: everything within N tiles of the viewpoint

use super::{LoadStrategy, StrategyContext};
use crate::streaming::lod::lod_from_distance;
use crate::streaming::tile::{TileCoord, Viewpoint};

/// Loads tiles within `load_radius` tiles of the viewpoint and unloads them
/// once they are strictly further than `unload_radius`.
///
/// Keeping `unload_radius` above `load_radius` leaves a ring where tiles are
/// neither requested nor dropped, so a viewpoint moving along a tile border
/// does not churn the edge of the resident set.
#[derive(Clone, Debug)]
pub struct RadiusStrategy {
    load_radius: f32,
    unload_radius: f32,
    /// Explicit `(loads, unloads)`; the context default applies otherwise
    budget: Option<(usize, usize)>,
    default_budget: (usize, usize),
    tile_size: f32,
}

impl RadiusStrategy {
    /// Create a radius strategy
    ///
    /// # Arguments
    /// * `load_radius` - Load tiles at or within this distance (in tiles)
    /// * `unload_radius` - Unload tiles beyond this distance (in tiles); raised to `load_radius` if smaller
    pub fn new(load_radius: f32, unload_radius: f32) -> Self {
        if unload_radius < load_radius {
            log::warn!(
                "unload radius {} is inside load radius {}; using {}",
                unload_radius, load_radius, load_radius
            );
        }
        Self {
            load_radius,
            unload_radius: unload_radius.max(load_radius),
            budget: None,
            default_budget: (16, 32),
            tile_size: 1.0,
        }
    }

    /// Override the per-frame operation budget taken from the context
    pub fn with_budget(mut self, max_loads: usize, max_unloads: usize) -> Self {
        self.budget = Some((max_loads, max_unloads));
        self
    }

    pub fn load_radius(&self) -> f32 {
        self.load_radius
    }

    pub fn unload_radius(&self) -> f32 {
        self.unload_radius
    }

    /// Distance in tiles from the tile under the viewpoint
    pub(crate) fn tile_distance(&self, coord: TileCoord, viewpoint: &Viewpoint, tile_size: f32) -> f32 {
        TileCoord::from_world_pos(viewpoint.position, tile_size).tile_distance(coord)
    }
}

impl LoadStrategy for RadiusStrategy {
    fn name(&self) -> &'static str {
        "radius"
    }

    fn candidate_tiles(&self, viewpoint: &Viewpoint, ctx: &StrategyContext) -> Vec<TileCoord> {
        ctx.tiles_around(viewpoint, self.load_radius)
    }

    fn should_load(&self, coord: TileCoord, viewpoint: &Viewpoint, ctx: &StrategyContext) -> bool {
        ctx.in_world(coord) && self.tile_distance(coord, viewpoint, ctx.tile_size) <= self.load_radius
    }

    fn should_unload(&self, coord: TileCoord, viewpoint: &Viewpoint, ctx: &StrategyContext) -> bool {
        !ctx.in_world(coord) || self.tile_distance(coord, viewpoint, ctx.tile_size) > self.unload_radius
    }

    fn get_load_priority(&self, coord: TileCoord, viewpoint: &Viewpoint) -> f32 {
        1.0 / (1.0 + viewpoint.distance_to(coord, self.tile_size))
    }

    fn calculate_lod(&self, coord: TileCoord, viewpoint: &Viewpoint, ctx: &StrategyContext) -> u32 {
        lod_from_distance(viewpoint.distance_to(coord, ctx.tile_size), &ctx.lod_distances)
    }

    fn get_max_operations_per_frame(&self) -> (usize, usize) {
        self.budget.unwrap_or(self.default_budget)
    }

    fn on_activated(&mut self, ctx: &StrategyContext) {
        self.tile_size = ctx.tile_size;
        self.default_budget = ctx.default_budget;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;

    fn ctx() -> StrategyContext {
        StrategyContext {
            tile_size: 10.0,
            lod_distances: vec![25.0, 50.0],
            vertical_extent: (0.0, 10.0),
            world_bounds: None,
            default_budget: (16, 32),
        }
    }

    fn activated(load: f32, unload: f32) -> RadiusStrategy {
        let mut strategy = RadiusStrategy::new(load, unload);
        strategy.on_activated(&ctx());
        strategy
    }

    #[test]
    fn test_load_within_radius() {
        let strategy = activated(2.0, 3.0);
        let vp = Viewpoint::at(Vec3::new(5.0, 0.0, 5.0));

        assert!(strategy.should_load(TileCoord::new(0, 0), &vp, &ctx()));
        assert!(strategy.should_load(TileCoord::new(2, 0), &vp, &ctx()));
        assert!(!strategy.should_load(TileCoord::new(3, 0), &vp, &ctx()));
    }

    #[test]
    fn test_unload_strictly_beyond_radius() {
        let strategy = activated(2.0, 3.0);
        let vp = Viewpoint::at(Vec3::new(5.0, 0.0, 5.0));

        assert!(!strategy.should_unload(TileCoord::new(3, 0), &vp, &ctx()));
        assert!(strategy.should_unload(TileCoord::new(4, 0), &vp, &ctx()));
        // Between the radii: neither requested nor dropped
        assert!(!strategy.should_load(TileCoord::new(3, 0), &vp, &ctx()));
    }

    #[test]
    fn test_unload_radius_never_inside_load_radius() {
        let strategy = RadiusStrategy::new(4.0, 1.0);
        assert_eq!(strategy.unload_radius(), 4.0);
    }

    #[test]
    fn test_priority_decreases_with_distance() {
        let strategy = activated(5.0, 6.0);
        let vp = Viewpoint::at(Vec3::new(5.0, 0.0, 5.0));

        let near = strategy.get_load_priority(TileCoord::new(0, 0), &vp);
        let mid = strategy.get_load_priority(TileCoord::new(1, 1), &vp);
        let far = strategy.get_load_priority(TileCoord::new(4, 0), &vp);
        assert_eq!(near, 1.0);
        assert!(near > mid && mid > far);
    }

    #[test]
    fn test_calculate_lod_uses_context_bands() {
        let strategy = activated(10.0, 12.0);
        let vp = Viewpoint::at(Vec3::new(5.0, 0.0, 5.0));

        assert_eq!(strategy.calculate_lod(TileCoord::new(1, 0), &vp, &ctx()), 0);
        assert_eq!(strategy.calculate_lod(TileCoord::new(3, 0), &vp, &ctx()), 1);
        assert_eq!(strategy.calculate_lod(TileCoord::new(8, 0), &vp, &ctx()), 2);
    }

    #[test]
    fn test_candidates_cover_load_area() {
        let strategy = activated(2.0, 3.0);
        let vp = Viewpoint::at(Vec3::new(5.0, 0.0, 5.0));
        let candidates = strategy.candidate_tiles(&vp, &ctx());

        for y in -2..=2 {
            for x in -2..=2 {
                let coord = TileCoord::new(x, y);
                if strategy.should_load(coord, &vp, &ctx()) {
                    assert!(candidates.contains(&coord));
                }
            }
        }
    }

    #[test]
    fn test_budget() {
        let strategy = RadiusStrategy::new(1.0, 2.0).with_budget(3, 5);
        assert_eq!(strategy.get_max_operations_per_frame(), (3, 5));
    }

    #[test]
    fn test_budget_defaults_to_context() {
        let ctx = StrategyContext { default_budget: (2, 9), ..ctx() };

        let mut plain = RadiusStrategy::new(1.0, 2.0);
        plain.on_activated(&ctx);
        assert_eq!(plain.get_max_operations_per_frame(), (2, 9));

        let mut explicit = RadiusStrategy::new(1.0, 2.0).with_budget(3, 5);
        explicit.on_activated(&ctx);
        assert_eq!(explicit.get_max_operations_per_frame(), (3, 5));
    }
}
