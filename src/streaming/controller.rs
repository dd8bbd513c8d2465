//! Streaming controller
//!
//! Runs once per frame on the privileged thread. Each update:
//!
//! 0. drains privileged work queued by generators
//! 1. unloads resident tiles the strategy no longer wants
//! 2. requests new tiles, most important first
//! 3. cancels requests for tiles that fell out of range
//! 4. on a slower cadence, moves resident tiles between LODs with hysteresis
//! 5. applies completed generation results within a time budget
//!
//! and finally enforces the optional pipeline deadline. Every step is bounded
//! by the strategy's per-frame operation budget.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::budget::FrameBudget;
use super::cache::{CacheStats, SpatialCache};
use super::config::StreamingConfig;
use super::executor::CrossThreadExecutor;
use super::generator::{ContentGenerator, GenerationError, PresentationSink};
use super::lod::apply_hysteresis;
use super::queue::{GenerationEvent, GenerationQueue, QueueStats};
use super::strategy::{LoadStrategy, StrategyContext};
use super::tile::{TileCoord, TileKey, TilePayload, Viewpoint};
use crate::core::{Error, Result};

/// Where a tile is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TilePhase {
    /// First request outstanding, nothing resident yet
    Loading,
    /// Resident at `current_lod`
    Resident,
    /// Resident at `current_lod` while `target_lod` is generated
    Transitioning,
}

/// Per-tile LOD bookkeeping for resident tiles
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResidentTileState {
    pub current_lod: u32,
    pub target_lod: u32,
    pub is_transitioning: bool,
    /// Distance to the viewpoint at the last LOD evaluation
    pub last_observed_distance: f32,
}

struct TileRecord<T> {
    phase: TilePhase,
    state: ResidentTileState,
    payload: Option<Arc<TilePayload<T>>>,
}

impl<T> TileRecord<T> {
    fn loading(lod: u32, distance: f32) -> Self {
        Self {
            phase: TilePhase::Loading,
            state: ResidentTileState {
                current_lod: lod,
                target_lod: lod,
                is_transitioning: false,
                last_observed_distance: distance,
            },
            payload: None,
        }
    }

    fn is_resident(&self) -> bool {
        self.phase != TilePhase::Loading
    }

    /// The key of the request this tile is waiting on, if any
    fn outstanding_key(&self, coord: TileCoord) -> Option<TileKey> {
        match self.phase {
            TilePhase::Resident => None,
            _ => Some(TileKey::new(coord, self.state.target_lod)),
        }
    }

    /// Abandon any transition and stay at the current LOD
    fn settle(&mut self) {
        self.phase = TilePhase::Resident;
        self.state.target_lod = self.state.current_lod;
        self.state.is_transitioning = false;
    }
}

/// What one `update` did
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    /// Privileged operations run from the executor
    pub privileged_ops: usize,
    pub unloaded: usize,
    pub loads_requested: usize,
    pub cancelled: usize,
    pub transitions_started: usize,
    /// Tiles that became resident or switched LOD
    pub tiles_ready: usize,
    pub failures: usize,
    /// Results for tiles that were no longer wanted
    pub stale_discarded: usize,
    /// The pipeline deadline fired this frame
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// Builder for [`StreamingController`]
///
/// Strategy, generator and sink are required. Executor and cache are created
/// from the config when not supplied.
pub struct StreamingControllerBuilder<G: ContentGenerator, S> {
    config: StreamingConfig,
    strategy: Option<Box<dyn LoadStrategy>>,
    generator: Option<G>,
    sink: Option<S>,
    executor: Option<Arc<CrossThreadExecutor>>,
    cache: Option<Arc<SpatialCache<G::Content>>>,
}

impl<G, S> StreamingControllerBuilder<G, S>
where
    G: ContentGenerator,
    S: PresentationSink<G::Content>,
{
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            config,
            strategy: None,
            generator: None,
            sink: None,
            executor: None,
            cache: None,
        }
    }

    pub fn strategy(mut self, strategy: impl LoadStrategy + 'static) -> Self {
        self.strategy = Some(Box::new(strategy));
        self
    }

    pub fn boxed_strategy(mut self, strategy: Box<dyn LoadStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn generator(mut self, generator: G) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn sink(mut self, sink: S) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share an executor with the generator. Its privileged thread must be
    /// the thread that calls `update`.
    pub fn executor(mut self, executor: Arc<CrossThreadExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Reuse an existing cache instead of allocating one from the config
    pub fn cache(mut self, cache: Arc<SpatialCache<G::Content>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<StreamingController<G, S>> {
        self.config.validate()?;
        let mut strategy = self
            .strategy
            .ok_or_else(|| Error::Config("no load strategy configured".into()))?;
        let generator = self
            .generator
            .ok_or_else(|| Error::Config("no content generator configured".into()))?;
        let sink = self
            .sink
            .ok_or_else(|| Error::Config("no presentation sink configured".into()))?;

        let executor = self.executor.unwrap_or_else(|| Arc::new(CrossThreadExecutor::new()));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(SpatialCache::new(self.config.cache_capacity_bytes)));
        let queue = GenerationQueue::new(
            generator,
            Arc::clone(&cache),
            self.config.max_concurrent_requests,
            self.config.tile_size,
        )?;

        let ctx = StrategyContext::from_config(&self.config);
        strategy.on_activated(&ctx);

        log::info!(
            "Streaming controller ready: strategy '{}', tile size {}, {} workers, {} MB cache",
            strategy.name(),
            self.config.tile_size,
            queue.max_concurrent(),
            cache.capacity_bytes() / (1024 * 1024)
        );

        Ok(StreamingController {
            config: self.config,
            ctx,
            strategy,
            queue,
            cache,
            executor,
            sink,
            tiles: BTreeMap::new(),
            frame: 0,
            busy_since: None,
        })
    }
}

/// Decides which tiles are resident and at what detail, one frame at a time
pub struct StreamingController<G, S>
where
    G: ContentGenerator,
    S: PresentationSink<G::Content>,
{
    config: StreamingConfig,
    ctx: StrategyContext,
    strategy: Box<dyn LoadStrategy>,
    queue: GenerationQueue<G>,
    cache: Arc<SpatialCache<G::Content>>,
    executor: Arc<CrossThreadExecutor>,
    sink: S,
    tiles: BTreeMap<TileCoord, TileRecord<G::Content>>,
    frame: u64,
    /// When the queue last went from idle to busy
    busy_since: Option<Instant>,
}

impl<G, S> StreamingController<G, S>
where
    G: ContentGenerator,
    S: PresentationSink<G::Content>,
{
    pub fn builder(config: StreamingConfig) -> StreamingControllerBuilder<G, S> {
        StreamingControllerBuilder::new(config)
    }

    /// Advance streaming by one frame
    pub fn update(&mut self, viewpoint: &Viewpoint) -> FrameReport {
        let started = Instant::now();
        self.frame += 1;

        let mut report = FrameReport { frame: self.frame, ..Default::default() };
        let (max_loads, max_unloads) = self.strategy.get_max_operations_per_frame();
        let mut budget = FrameBudget::new(self.config.event_budget(), max_loads, max_unloads);

        report.privileged_ops = self.executor.drain();
        self.unload_out_of_range(viewpoint, &mut budget, &mut report);
        self.request_new_tiles(viewpoint, &mut budget, &mut report);
        self.cancel_unwanted_requests(viewpoint, &mut report);
        if self.frame % u64::from(self.config.lod_update_interval.max(1)) == 0 {
            self.update_lods(viewpoint, &mut budget, &mut report);
        }
        self.apply_completed(&budget, &mut report);
        self.enforce_pipeline_deadline(&mut report);

        report.elapsed = started.elapsed();
        if report.loads_requested + report.unloaded + report.tiles_ready > 0 {
            log::debug!(
                "Frame {}: {} requested, {} ready, {} unloaded, {} cancelled",
                report.frame, report.loads_requested, report.tiles_ready,
                report.unloaded, report.cancelled
            );
        }
        report
    }

    // --- Frame steps ---

    fn unload_out_of_range(&mut self, viewpoint: &Viewpoint, budget: &mut FrameBudget, report: &mut FrameReport) {
        let doomed: Vec<TileCoord> = self
            .tiles
            .iter()
            .filter(|(_, record)| record.is_resident())
            .filter(|(coord, _)| self.strategy.should_unload(**coord, viewpoint, &self.ctx))
            .map(|(coord, _)| *coord)
            .collect();

        for coord in doomed {
            if !budget.try_unload() {
                log::trace!("Unload budget spent; deferring remaining unloads");
                break;
            }
            if let Some(record) = self.tiles.remove(&coord) {
                if let Some(key) = record.outstanding_key(coord) {
                    self.queue.cancel(&key);
                }
                self.sink.on_tile_removed(coord);
                report.unloaded += 1;
            }
        }
    }

    fn request_new_tiles(&mut self, viewpoint: &Viewpoint, budget: &mut FrameBudget, report: &mut FrameReport) {
        let mut wanted: Vec<(TileCoord, f32)> = self
            .strategy
            .candidate_tiles(viewpoint, &self.ctx)
            .into_iter()
            .filter(|coord| !self.tiles.contains_key(coord))
            .filter(|&coord| self.strategy.should_load(coord, viewpoint, &self.ctx))
            .map(|coord| (coord, self.strategy.get_load_priority(coord, viewpoint)))
            .collect();
        wanted.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (coord, priority) in wanted {
            if !budget.try_load() {
                break;
            }
            let lod = self.strategy.calculate_lod(coord, viewpoint, &self.ctx);
            self.queue.request(TileKey::new(coord, lod), -priority);
            self.tiles.insert(
                coord,
                TileRecord::loading(lod, viewpoint.distance_to(coord, self.ctx.tile_size)),
            );
            report.loads_requested += 1;
        }
    }

    fn cancel_unwanted_requests(&mut self, viewpoint: &Viewpoint, report: &mut FrameReport) {
        let mut dropped = Vec::new();
        for (&coord, record) in &self.tiles {
            if record.phase != TilePhase::Loading {
                continue;
            }
            let key = TileKey::new(coord, record.state.target_lod);
            if self.strategy.should_load(coord, viewpoint, &self.ctx) {
                // Keep queue order in step with the moving viewpoint
                let priority = self.strategy.get_load_priority(coord, viewpoint);
                self.queue.update_priority(&key, -priority);
            } else {
                dropped.push(key);
            }
        }

        for key in dropped {
            self.tiles.remove(&key.coord);
            self.queue.cancel(&key);
            report.cancelled += 1;
        }
    }

    fn update_lods(&mut self, viewpoint: &Viewpoint, budget: &mut FrameBudget, report: &mut FrameReport) {
        let thresholds = &self.ctx.lod_distances;
        let hysteresis = self.config.hysteresis_factor;

        let mut changes: Vec<(TileCoord, u32, f32)> = Vec::new();
        for (&coord, record) in self.tiles.iter_mut() {
            if !record.is_resident() {
                continue;
            }
            let distance = viewpoint.distance_to(coord, self.ctx.tile_size);
            record.state.last_observed_distance = distance;

            let current = record.state.current_lod;
            let desired = self.strategy.calculate_lod(coord, viewpoint, &self.ctx);
            let target = if desired == current {
                current
            } else {
                apply_hysteresis(current, distance, thresholds, hysteresis)
                    .clamp(current.min(desired), current.max(desired))
            };
            if target != record.state.target_lod {
                changes.push((coord, target, self.strategy.get_load_priority(coord, viewpoint)));
            }
        }
        changes.sort_by(|a, b| b.2.total_cmp(&a.2));

        for (coord, target, priority) in changes {
            let Some(record) = self.tiles.get_mut(&coord) else {
                continue;
            };

            if target == record.state.current_lod {
                if let Some(key) = record.outstanding_key(coord) {
                    self.queue.cancel(&key);
                }
                record.settle();
                log::trace!("Tile {} back in band; transition abandoned", coord);
                continue;
            }
            if !budget.try_load() {
                continue;
            }

            if let Some(key) = record.outstanding_key(coord) {
                self.queue.cancel(&key);
            }
            self.queue.request(TileKey::new(coord, target), -priority);
            record.phase = TilePhase::Transitioning;
            record.state.target_lod = target;
            record.state.is_transitioning = true;
            report.transitions_started += 1;
            log::trace!("Tile {} LOD {} -> {}", coord, record.state.current_lod, target);
        }
    }

    fn apply_completed(&mut self, budget: &FrameBudget, report: &mut FrameReport) {
        while let Some(event) = self.queue.poll_event() {
            match event {
                GenerationEvent::Completed { key, payload, .. } => self.on_completed(key, payload, report),
                GenerationEvent::Failed { key, reason } => self.on_failed(key, &reason, report),
            }
            if budget.time_exhausted() {
                log::trace!("Event budget spent after {:?}", budget.elapsed());
                break;
            }
        }
    }

    fn on_completed(&mut self, key: TileKey, payload: Arc<TilePayload<G::Content>>, report: &mut FrameReport) {
        let Some(record) = self
            .tiles
            .get_mut(&key.coord)
            .filter(|record| record.outstanding_key(key.coord) == Some(key))
        else {
            log::trace!("Discarding stale result for {}", key);
            report.stale_discarded += 1;
            return;
        };

        record.state.current_lod = key.lod;
        record.settle();
        record.payload = Some(Arc::clone(&payload));
        self.sink.on_tile_ready(key.coord, key.lod, payload);
        report.tiles_ready += 1;
    }

    fn on_failed(&mut self, key: TileKey, reason: &GenerationError, report: &mut FrameReport) {
        let phase = self
            .tiles
            .get(&key.coord)
            .filter(|record| record.outstanding_key(key.coord) == Some(key))
            .map(|record| record.phase);

        match phase {
            Some(TilePhase::Loading) => {
                self.tiles.remove(&key.coord);
            }
            Some(_) => {
                if let Some(record) = self.tiles.get_mut(&key.coord) {
                    record.settle();
                }
            }
            None => {
                report.stale_discarded += 1;
                return;
            }
        }

        self.sink.on_tile_failed(key, reason);
        report.failures += 1;
    }

    /// Abort the whole generation batch once the queue has been busy too long
    fn enforce_pipeline_deadline(&mut self, report: &mut FrameReport) {
        let Some(limit) = self.config.max_pipeline_duration() else {
            return;
        };
        if self.queue.is_idle() {
            self.busy_since = None;
            return;
        }

        let since = *self.busy_since.get_or_insert_with(Instant::now);
        if since.elapsed() <= limit {
            return;
        }

        log::warn!(
            "Generation pipeline busy for {:?} (limit {:?}); cancelling batch",
            since.elapsed(),
            limit
        );
        report.cancelled += self.queue.cancel_all();
        self.tiles.retain(|_, record| record.is_resident());
        for record in self.tiles.values_mut() {
            record.settle();
        }
        self.busy_since = None;
        report.timed_out = true;
    }

    // --- Control ---

    /// Replace the load strategy, returning the previous one
    pub fn set_strategy(&mut self, strategy: Box<dyn LoadStrategy>) -> Box<dyn LoadStrategy> {
        let mut previous = std::mem::replace(&mut self.strategy, strategy);
        previous.on_deactivated();
        self.strategy.on_activated(&self.ctx);
        log::info!("Load strategy '{}' replaced by '{}'", previous.name(), self.strategy.name());
        previous
    }

    /// Unload every tile and cancel all outstanding work
    pub fn clear(&mut self) {
        self.queue.cancel_all();
        let tiles = std::mem::take(&mut self.tiles);
        for (coord, record) in tiles {
            if record.is_resident() {
                self.sink.on_tile_removed(coord);
            }
        }
        self.busy_since = None;
    }

    // --- Queries ---

    /// Coordinates of resident tiles, in coordinate order
    pub fn resident_tiles(&self) -> Vec<TileCoord> {
        self.tiles
            .iter()
            .filter(|(_, record)| record.is_resident())
            .map(|(coord, _)| *coord)
            .collect()
    }

    pub fn resident_count(&self) -> usize {
        self.tiles.values().filter(|record| record.is_resident()).count()
    }

    /// LOD state of a resident tile
    pub fn tile_state(&self, coord: TileCoord) -> Option<ResidentTileState> {
        self.tiles
            .get(&coord)
            .filter(|record| record.is_resident())
            .map(|record| record.state)
    }

    pub fn tile_phase(&self, coord: TileCoord) -> Option<TilePhase> {
        self.tiles.get(&coord).map(|record| record.phase)
    }

    pub fn is_loading(&self, coord: TileCoord) -> bool {
        self.tile_phase(coord) == Some(TilePhase::Loading)
    }

    /// Payload currently presented for a resident tile
    pub fn resident_payload(&self, coord: TileCoord) -> Option<Arc<TilePayload<G::Content>>> {
        self.tiles.get(&coord).and_then(|record| record.payload.clone())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    pub fn active_count(&self) -> usize {
        self.queue.active_count()
    }

    pub fn total_count(&self) -> usize {
        self.queue.total_count()
    }

    pub fn queue(&self) -> &GenerationQueue<G> {
        &self.queue
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn strategy(&self) -> &dyn LoadStrategy {
        self.strategy.as_ref()
    }

    pub fn context(&self) -> &StrategyContext {
        &self.ctx
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SpatialCache<G::Content>> {
        &self.cache
    }

    pub fn executor(&self) -> &Arc<CrossThreadExecutor> {
        &self.executor
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

impl<G, S> Drop for StreamingController<G, S>
where
    G: ContentGenerator,
    S: PresentationSink<G::Content>,
{
    fn drop(&mut self) {
        self.strategy.on_deactivated();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;
    use crate::streaming::strategy::RadiusStrategy;
    use crate::streaming::test_support::{wait_until, Gate, RecordingSink, TestGenerator};

    type TestController = StreamingController<Arc<TestGenerator>, RecordingSink>;

    fn config() -> StreamingConfig {
        StreamingConfig {
            tile_size: 10.0,
            cache_capacity_bytes: 1_000_000,
            max_concurrent_requests: 2,
            lod_distances: vec![100.0],
            hysteresis_factor: 0.1,
            lod_update_interval: 1,
            event_budget_ms: 50.0,
            ..Default::default()
        }
    }

    fn build(config: StreamingConfig, strategy: RadiusStrategy, generator: &Arc<TestGenerator>) -> TestController {
        StreamingController::builder(config)
            .strategy(strategy)
            .generator(Arc::clone(generator))
            .sink(RecordingSink::default())
            .build()
            .unwrap()
    }

    /// Viewpoint `dx` world units east of the center of tile (0, 0)
    fn east_of_origin(dx: f32) -> Viewpoint {
        Viewpoint::at(Vec3::new(5.0 + dx, 0.0, 5.0))
    }

    fn pump_until(controller: &mut TestController, viewpoint: &Viewpoint, mut done: impl FnMut(&TestController) -> bool) {
        wait_until(|| {
            controller.update(viewpoint);
            done(controller)
        });
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let missing_strategy = StreamingControllerBuilder::<Arc<TestGenerator>, RecordingSink>::new(config())
            .generator(Arc::new(TestGenerator::new(1)))
            .sink(RecordingSink::default())
            .build();
        assert!(matches!(missing_strategy, Err(Error::Config(_))));

        let missing_generator = StreamingControllerBuilder::<Arc<TestGenerator>, RecordingSink>::new(config())
            .strategy(RadiusStrategy::new(1.0, 2.0))
            .sink(RecordingSink::default())
            .build();
        assert!(matches!(missing_generator, Err(Error::Config(_))));

        let missing_sink = StreamingControllerBuilder::<Arc<TestGenerator>, RecordingSink>::new(config())
            .strategy(RadiusStrategy::new(1.0, 2.0))
            .generator(Arc::new(TestGenerator::new(1)))
            .build();
        assert!(matches!(missing_sink, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = StreamingControllerBuilder::<Arc<TestGenerator>, RecordingSink>::new(StreamingConfig {
            tile_size: -1.0,
            ..config()
        })
        .strategy(RadiusStrategy::new(1.0, 2.0))
        .generator(Arc::new(TestGenerator::new(1)))
        .sink(RecordingSink::default())
        .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_loads_tiles_around_viewpoint() {
        let generator = Arc::new(TestGenerator::new(100));
        // 1.5 tiles reaches the diagonal neighbours at sqrt(2)
        let mut controller = build(config(), RadiusStrategy::new(1.5, 2.5), &generator);
        let vp = east_of_origin(0.0);

        let first = controller.update(&vp);
        assert_eq!(first.loads_requested, 9);

        pump_until(&mut controller, &vp, |c| c.resident_count() == 9);
        assert_eq!(controller.sink().ready.len(), 9);
        assert_eq!(controller.cache_stats().entry_count, 9);
        assert!(controller.resident_tiles().contains(&TileCoord::new(-1, 1)));

        let state = controller.tile_state(TileCoord::new(0, 0)).unwrap();
        assert_eq!(state.current_lod, 0);
        assert!(!state.is_transitioning);
        assert!(controller.resident_payload(TileCoord::new(0, 0)).is_some());
    }

    #[test]
    fn test_load_budget_favours_nearest_tiles() {
        let gate = Arc::new(Gate::closed());
        let generator = Arc::new(TestGenerator::new(10).with_gate(Arc::clone(&gate)));
        let mut controller = build(config(), RadiusStrategy::new(1.5, 2.5).with_budget(3, 8), &generator);

        let report = controller.update(&east_of_origin(0.0));
        assert_eq!(report.loads_requested, 3);
        assert!(controller.is_loading(TileCoord::new(0, 0)));
        for corner in [(-1, -1), (-1, 1), (1, -1), (1, 1)] {
            assert!(!controller.is_loading(TileCoord::new(corner.0, corner.1)));
        }
        gate.open();
    }

    #[test]
    fn test_config_budget_applies_to_strategy() {
        let gate = Arc::new(Gate::closed());
        let generator = Arc::new(TestGenerator::new(10).with_gate(Arc::clone(&gate)));
        let mut controller = build(
            StreamingConfig { max_loads_per_frame: 2, max_unloads_per_frame: 5, ..config() },
            RadiusStrategy::new(1.5, 2.5),
            &generator,
        );
        assert_eq!(controller.strategy().get_max_operations_per_frame(), (2, 5));

        let first = controller.update(&east_of_origin(0.0));
        assert_eq!(first.loads_requested, 2);
        let second = controller.update(&east_of_origin(0.0));
        assert_eq!(second.loads_requested, 2);
        gate.open();
    }

    #[test]
    fn test_event_budget_applies_one_result_per_frame_when_spent() {
        let generator = Arc::new(TestGenerator::new(10));
        let mut controller = build(
            StreamingConfig { event_budget_ms: 0.0, ..config() },
            RadiusStrategy::new(1.5, 2.5),
            &generator,
        );
        let vp = east_of_origin(0.0);

        assert_eq!(controller.update(&vp).loads_requested, 9);
        wait_until(|| controller.queue().is_idle());

        for applied in 1..=9 {
            let report = controller.update(&vp);
            assert_eq!(report.tiles_ready, 1);
            assert_eq!(controller.resident_count(), applied);
        }
        assert_eq!(controller.update(&vp).tiles_ready, 0);
    }

    #[test]
    fn test_lod_evaluated_every_nth_frame() {
        let gate = Arc::new(Gate::closed());
        let generator = Arc::new(TestGenerator::new(10).with_gate(Arc::clone(&gate)));
        let single_tile = StreamingConfig {
            world_bounds: Some([0, 0, 0, 0]),
            lod_update_interval: 3,
            ..config()
        };
        let mut controller = build(single_tile, RadiusStrategy::new(20.0, 25.0), &generator);
        let origin = TileCoord::new(0, 0);

        gate.open();
        pump_until(&mut controller, &east_of_origin(0.0), |c| c.resident_count() == 1);
        gate.close();

        // Far enough for LOD 1; only a frame divisible by 3 may start the move
        let far = east_of_origin(150.0);
        let mut started = 0;
        for _ in 0..3 {
            let report = controller.update(&far);
            let evaluated = report.frame % 3 == 0;
            assert_eq!(report.transitions_started, usize::from(evaluated));
            started += report.transitions_started;
            assert_eq!(controller.tile_state(origin).unwrap().is_transitioning, started == 1);
        }
        assert_eq!(started, 1);
        gate.open();
    }

    #[test]
    fn test_pending_request_cancelled_when_out_of_range() {
        let gate = Arc::new(Gate::closed());
        let generator = Arc::new(TestGenerator::new(10).with_gate(Arc::clone(&gate)));
        let mut controller = build(
            StreamingConfig { max_concurrent_requests: 1, ..config() },
            RadiusStrategy::new(1.5, 2.5),
            &generator,
        );

        controller.update(&east_of_origin(0.0));
        let far_key = TileKey::new(TileCoord::new(1, 1), 0);
        assert!(controller.queue().has_pending(&far_key));

        let report = controller.update(&east_of_origin(1000.0));
        assert_eq!(report.cancelled, 9);
        assert!(!controller.queue().has_pending(&far_key));
        assert!(!controller.is_loading(TileCoord::new(1, 1)));

        gate.open();
        pump_until(&mut controller, &east_of_origin(1000.0), |c| c.resident_count() == 9);
        // Only the tile already running at the time of the move was generated
        assert!(!generator.calls().contains(&far_key));
        assert!(controller.tile_state(TileCoord::new(0, 0)).is_none());
    }

    #[test]
    fn test_failed_tile_is_not_resident_or_cached() {
        let generator = Arc::new(TestGenerator::new(10));
        generator.fail_at(TileCoord::new(2, 3));
        let mut controller = build(config(), RadiusStrategy::new(0.0, 1.0), &generator);
        let vp = Viewpoint::at(Vec3::new(25.0, 0.0, 35.0));

        pump_until(&mut controller, &vp, |c| !c.sink().failed.is_empty());
        assert_eq!(controller.sink().failed[0], TileKey::new(TileCoord::new(2, 3), 0));
        assert!(controller.resident_tiles().is_empty());
        assert!(controller.tile_state(TileCoord::new(2, 3)).is_none());
        assert!(!controller.cache().contains(&TileKey::new(TileCoord::new(2, 3), 0)));
        assert!(controller.sink().ready.is_empty());
    }

    #[test]
    fn test_failed_tile_retried_while_in_range() {
        let generator = Arc::new(TestGenerator::new(10));
        generator.fail_at(TileCoord::new(0, 0));
        let mut controller = build(config(), RadiusStrategy::new(0.0, 1.0), &generator);
        let vp = east_of_origin(0.0);

        pump_until(&mut controller, &vp, |c| c.sink().failed.len() >= 2);
        assert!(generator.call_count() >= 2);
        assert!(controller.resident_tiles().is_empty());
    }

    #[test]
    fn test_unloads_respect_budget() {
        let generator = Arc::new(TestGenerator::new(10));
        let mut controller = build(config(), RadiusStrategy::new(1.5, 2.5).with_budget(16, 4), &generator);
        let home = east_of_origin(0.0);
        pump_until(&mut controller, &home, |c| c.resident_count() == 9);

        let away = east_of_origin(1000.0);
        let first = controller.update(&away);
        assert_eq!(first.unloaded, 4);
        let second = controller.update(&away);
        assert_eq!(second.unloaded, 4);
        let third = controller.update(&away);
        assert_eq!(third.unloaded, 1);

        assert_eq!(controller.sink().removed.len(), 9);
        assert!(controller.tile_state(TileCoord::new(0, 0)).is_none());
        // Unloading leaves the cache alone
        assert!(controller.cache().contains(&TileKey::new(TileCoord::new(0, 0), 0)));
    }

    #[test]
    fn test_lod_transition_with_hysteresis() {
        let gate = Arc::new(Gate::closed());
        let generator = Arc::new(TestGenerator::new(10).with_gate(Arc::clone(&gate)));
        let single_tile = StreamingConfig { world_bounds: Some([0, 0, 0, 0]), ..config() };
        let mut controller = build(single_tile, RadiusStrategy::new(20.0, 25.0), &generator);
        let origin = TileCoord::new(0, 0);

        gate.open();
        pump_until(&mut controller, &east_of_origin(0.0), |c| c.resident_count() == 1);
        assert_eq!(controller.tile_state(origin).unwrap().current_lod, 0);
        gate.close();

        // Inside the dead-zone: stays at LOD 0
        let report = controller.update(&east_of_origin(105.0));
        assert_eq!(report.transitions_started, 0);
        let state = controller.tile_state(origin).unwrap();
        assert_eq!(state.target_lod, 0);
        assert_eq!(state.last_observed_distance, 105.0);

        let report = controller.update(&east_of_origin(111.0));
        assert_eq!(report.transitions_started, 1);
        assert!(controller.tile_state(origin).unwrap().is_transitioning);
        // Still resident at the old LOD while the new one generates
        assert_eq!(controller.tile_state(origin).unwrap().current_lod, 0);

        gate.open();
        pump_until(&mut controller, &east_of_origin(111.0), |c| {
            c.tile_state(origin).is_some_and(|s| s.current_lod == 1 && !s.is_transitioning)
        });
        assert!(controller.sink().ready.contains(&(origin, 1)));
        assert!(controller.sink().removed.is_empty());

        let report = controller.update(&east_of_origin(95.0));
        assert_eq!(report.transitions_started, 0);
        assert_eq!(controller.tile_state(origin).unwrap().target_lod, 1);

        let report = controller.update(&east_of_origin(89.0));
        assert_eq!(report.transitions_started, 1);
        pump_until(&mut controller, &east_of_origin(89.0), |c| {
            c.tile_state(origin).is_some_and(|s| s.current_lod == 0)
        });
    }

    #[test]
    fn test_transition_abandoned_when_back_in_band() {
        let gate = Arc::new(Gate::closed());
        let generator = Arc::new(TestGenerator::new(10).with_gate(Arc::clone(&gate)));
        let single_tile = StreamingConfig { world_bounds: Some([0, 0, 0, 0]), ..config() };
        let mut controller = build(single_tile, RadiusStrategy::new(20.0, 25.0), &generator);
        let origin = TileCoord::new(0, 0);

        controller.update(&east_of_origin(0.0));
        gate.open();
        pump_until(&mut controller, &east_of_origin(0.0), |c| c.resident_count() == 1);
        gate.close();

        controller.update(&east_of_origin(150.0));
        assert!(controller.tile_state(origin).unwrap().is_transitioning);
        controller.update(&east_of_origin(0.0));
        let state = controller.tile_state(origin).unwrap();
        assert!(!state.is_transitioning);
        assert_eq!(state.target_lod, 0);
        assert_eq!(controller.tile_phase(origin), Some(TilePhase::Resident));
        gate.open();
    }

    #[test]
    fn test_result_for_departed_tile_is_stale() {
        let gate = Arc::new(Gate::closed());
        let generator = Arc::new(TestGenerator::new(10).with_gate(Arc::clone(&gate)));
        let single_tile = StreamingConfig { world_bounds: Some([0, 0, 0, 0]), ..config() };
        let mut controller = build(single_tile, RadiusStrategy::new(1.0, 2.0), &generator);

        controller.update(&east_of_origin(0.0));
        gate.open();
        wait_until(|| controller.queue().is_idle());

        let report = controller.update(&east_of_origin(1000.0));
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.stale_discarded, 1);
        assert!(controller.resident_tiles().is_empty());
        assert!(controller.sink().ready.is_empty());
    }

    #[test]
    fn test_pipeline_deadline_cancels_batch() {
        let gate = Arc::new(Gate::closed());
        let generator = Arc::new(TestGenerator::new(10).with_gate(Arc::clone(&gate)));
        let mut controller = build(
            StreamingConfig { max_pipeline_duration_ms: Some(20), ..config() },
            RadiusStrategy::new(1.0, 2.0),
            &generator,
        );
        let vp = east_of_origin(0.0);

        let first = controller.update(&vp);
        assert!(!first.timed_out);
        std::thread::sleep(Duration::from_millis(40));

        let report = controller.update(&vp);
        assert!(report.timed_out);
        assert_eq!(controller.pending_count(), 0);
        assert_eq!(controller.tile_phase(TileCoord::new(0, 0)), None);
        assert!(controller.resident_tiles().is_empty());
        gate.open();
    }

    #[test]
    fn test_clear_removes_everything() {
        let generator = Arc::new(TestGenerator::new(10));
        let mut controller = build(config(), RadiusStrategy::new(1.5, 2.5), &generator);
        let vp = east_of_origin(0.0);
        pump_until(&mut controller, &vp, |c| c.resident_count() == 9);

        controller.clear();
        assert!(controller.resident_tiles().is_empty());
        assert_eq!(controller.sink().removed.len(), 9);
        assert_eq!(controller.total_count(), 0);
    }

    #[test]
    fn test_set_strategy_shrinks_resident_set() {
        let generator = Arc::new(TestGenerator::new(10));
        let mut controller = build(config(), RadiusStrategy::new(1.5, 2.5), &generator);
        let vp = east_of_origin(0.0);
        pump_until(&mut controller, &vp, |c| c.resident_count() == 9);

        let previous = controller.set_strategy(Box::new(RadiusStrategy::new(0.0, 0.0)));
        assert_eq!(previous.name(), "radius");
        assert_eq!(controller.strategy().get_max_operations_per_frame(), (16, 32));

        let report = controller.update(&vp);
        assert_eq!(report.unloaded, 8);
        assert_eq!(controller.resident_tiles(), vec![TileCoord::new(0, 0)]);
    }

    #[test]
    fn test_update_drains_privileged_work() {
        let generator = Arc::new(TestGenerator::new(10));
        let mut controller = build(config(), RadiusStrategy::new(0.0, 1.0), &generator);
        let executor = Arc::clone(controller.executor());

        let worker = std::thread::spawn(move || executor.execute_blocking(|| 7));
        let mut drained = 0;
        wait_until(|| {
            drained += controller.update(&east_of_origin(0.0)).privileged_ops;
            worker.is_finished()
        });
        assert_eq!(worker.join().unwrap(), Ok(7));
        assert_eq!(drained, 1);
    }
}
