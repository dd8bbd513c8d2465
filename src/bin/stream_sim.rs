//! Streaming simulator - flies a viewpoint over noise terrain and reports
//! what the streaming controller does each frame.
//!
//! Usage: cargo run --release --bin stream_sim -- [OPTIONS]
//!
//! Options:
//!   --strategy <NAME>  radius | frustum | hierarchical (default: radius)
//!   --frames <N>       Frames to simulate (default: 600)
//!   --speed <UNITS>    Distance travelled per frame (default: 4.0)
//!   --radius <TILES>   Load radius for radius/frustum strategies (default: 6)
//!   --tile <SIZE>      Tile size in world units (default: 64)
//!   --jobs <N>         Concurrent generation jobs (default: 4)
//!   --seed <SEED>      Terrain seed (default: 12345)
//!   --frame-ms <MS>    Simulated frame time (default: 16)
//!   --config <JSON>    Streaming config as inline JSON; flags above override it

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use glam::{Mat4, Vec3};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use terrastream::core::logging;
use terrastream::math::Frustum;
use terrastream::streaming::{
    ContentGenerator, CrossThreadExecutor, FrustumCullingStrategy, GenerationError,
    HierarchicalStrategy, LoadStrategy, NullSink, RadiusStrategy, StreamingConfig,
    StreamingController, TileCoord, TilePayload, Viewpoint,
};

/// Highest sample count per tile edge, used at LOD 0
const BASE_RESOLUTION: u32 = 64;
const EYE_HEIGHT: f32 = 120.0;

/// Sampled heights for one tile
struct HeightField {
    resolution: u32,
    heights: Vec<f32>,
    min_height: f32,
    max_height: f32,
}

/// Fractal noise terrain. Each finished tile is "registered" on the frame
/// thread, the way a renderer would upload it.
struct NoiseTerrain {
    noise: Fbm<Perlin>,
    scale: f64,
    height_scale: f32,
    executor: Arc<CrossThreadExecutor>,
    registered: Arc<AtomicU64>,
}

impl NoiseTerrain {
    fn new(seed: u32, executor: Arc<CrossThreadExecutor>) -> Self {
        let noise = Fbm::<Perlin>::new(seed)
            .set_octaves(5)
            .set_persistence(0.5)
            .set_lacunarity(2.0);
        Self {
            noise,
            scale: 150.0,
            height_scale: 80.0,
            executor,
            registered: Arc::new(AtomicU64::new(0)),
        }
    }

    fn height_at(&self, x: f32, z: f32) -> f32 {
        let value = self.noise.get([x as f64 / self.scale, z as f64 / self.scale]);
        ((value + 1.0) * 0.5) as f32 * self.height_scale
    }
}

impl ContentGenerator for NoiseTerrain {
    type Content = HeightField;

    fn generate(
        &self,
        coord: TileCoord,
        world_extent: f32,
        lod: u32,
    ) -> Result<TilePayload<HeightField>, GenerationError> {
        let resolution = (BASE_RESOLUTION >> lod.min(5)).max(2);
        let step = world_extent / resolution as f32;
        let origin_x = coord.x as f32 * world_extent;
        let origin_z = coord.y as f32 * world_extent;

        let mut heights = Vec::with_capacity(((resolution + 1) * (resolution + 1)) as usize);
        for j in 0..=resolution {
            for i in 0..=resolution {
                heights.push(self.height_at(origin_x + i as f32 * step, origin_z + j as f32 * step));
            }
        }
        let min_height = heights.iter().copied().fold(f32::INFINITY, f32::min);
        let max_height = heights.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let registered = Arc::clone(&self.registered);
        self.executor.execute_blocking(move || {
            registered.fetch_add(1, Ordering::Relaxed);
        })?;

        let size_bytes = heights.len() * std::mem::size_of::<f32>();
        Ok(TilePayload::new(
            HeightField { resolution, heights, min_height, max_height },
            size_bytes,
        ))
    }
}

fn main() -> terrastream::core::Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = match parse_str_arg(&args, "--config") {
        Some(json) => serde_json::from_str::<StreamingConfig>(&json)
            .map_err(|e| terrastream::core::Error::Config(e.to_string()))?,
        None => StreamingConfig::default(),
    };
    let strategy_name = parse_str_arg(&args, "--strategy").unwrap_or_else(|| "radius".to_string());
    let frames = parse_u32_arg(&args, "--frames").unwrap_or(600);
    let speed = parse_f32_arg(&args, "--speed").unwrap_or(4.0);
    let radius = parse_f32_arg(&args, "--radius").unwrap_or(6.0);
    let seed = parse_u32_arg(&args, "--seed").unwrap_or(12345);
    let frame_time = Duration::from_millis(parse_u32_arg(&args, "--frame-ms").unwrap_or(16) as u64);
    if let Some(tile) = parse_f32_arg(&args, "--tile") {
        config.tile_size = tile;
    }
    if let Some(jobs) = parse_usize_arg(&args, "--jobs") {
        config.max_concurrent_requests = jobs;
    }

    let strategy: Box<dyn LoadStrategy> = match strategy_name.as_str() {
        "frustum" => Box::new(FrustumCullingStrategy::new(
            RadiusStrategy::new(radius, radius + 2.0),
            1.5,
            2.5,
        )),
        "hierarchical" => Box::new(HierarchicalStrategy::default()),
        _ => Box::new(RadiusStrategy::new(radius, radius + 2.0)),
    };

    println!("=== Terrastream Streaming Simulator ===");
    println!("Strategy: {}", strategy.name());
    println!("Frames:   {} at {:?}", frames, frame_time);
    println!("Speed:    {} units/frame", speed);
    println!("Tile:     {} units, {} jobs", config.tile_size, config.max_concurrent_requests);
    println!();

    let executor = Arc::new(CrossThreadExecutor::new());
    let terrain = NoiseTerrain::new(seed, Arc::clone(&executor));
    let registered = Arc::clone(&terrain.registered);

    let mut controller = StreamingController::builder(config)
        .boxed_strategy(strategy)
        .generator(terrain)
        .sink(NullSink)
        .executor(executor)
        .build()?;

    let projection = Mat4::perspective_rh(70f32.to_radians(), 16.0 / 9.0, 0.5, 4000.0);
    let start = Instant::now();
    let mut position = Vec3::new(0.0, EYE_HEIGHT, 0.0);

    for _ in 0..frames {
        let view = Mat4::look_at_rh(position, position + Vec3::X, Vec3::Y);
        let viewpoint = Viewpoint::at(position)
            .with_frustum(Frustum::from_view_projection(&(projection * view)));

        let report = controller.update(&viewpoint);
        if report.frame % 60 == 0 || report.timed_out {
            let cache = controller.cache_stats();
            println!(
                "frame {:>5} | resident {:>4} | pending {:>4} active {:>2} | +{} -{} x{} | cache {:>5.1}% hit {:>5.1}% | {:?}",
                report.frame,
                controller.resident_count(),
                controller.pending_count(),
                controller.active_count(),
                report.loads_requested,
                report.unloaded,
                report.cancelled,
                cache.utilization * 100.0,
                cache.hit_rate() * 100.0,
                report.elapsed,
            );
        }

        position.x += speed;
        std::thread::sleep(frame_time);
    }

    let sample = controller
        .resident_tiles()
        .first()
        .and_then(|&coord| controller.resident_payload(coord));
    if let Some(tile) = sample {
        log::debug!(
            "Sample tile: {} samples/edge, heights {:.1}..{:.1} ({} values)",
            tile.content.resolution, tile.content.min_height, tile.content.max_height,
            tile.content.heights.len()
        );
    }

    // Release workers parked on the executor before shutting down
    controller.clear();
    while !controller.queue().is_idle() {
        controller.executor().drain();
        std::thread::sleep(Duration::from_millis(1));
    }

    let stats = controller.queue_stats();
    println!();
    println!("=== Summary ===");
    println!("Elapsed:    {:.2?}", start.elapsed());
    println!("Requested:  {}", stats.requested_total);
    println!("Completed:  {} ({} from cache)", stats.completed_total, stats.cache_hits_total);
    println!("Cancelled:  {}", stats.cancelled_total);
    println!("Failed:     {}", stats.failed_total);
    println!("Registered: {}", registered.load(Ordering::Relaxed));
    Ok(())
}

fn parse_f32_arg(args: &[String], flag: &str) -> Option<f32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
