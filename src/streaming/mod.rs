//! Tile streaming and LOD management
//!
//! The [`StreamingController`] decides each frame which tiles should be
//! resident, asks a [`GenerationQueue`] to produce them on worker threads,
//! caches results in a [`SpatialCache`] and hands finished tiles to a
//! [`PresentationSink`]. Which tiles matter, and at what detail, is up to the
//! installed [`LoadStrategy`].

pub mod tile;
pub mod cache;
pub mod generator;
pub mod executor;
pub mod budget;
pub mod lod;
pub mod config;
pub mod strategy;
pub mod queue;
pub mod controller;

#[cfg(test)]
pub(crate) mod test_support;

pub use tile::{TileBounds, TileCoord, TileKey, TilePayload, Viewpoint};
pub use cache::{CacheStats, SpatialCache};
pub use generator::{ContentGenerator, GenerationError, NullSink, PresentationSink};
pub use executor::{CrossThreadExecutor, ExecutorError, TaskHandle};
pub use budget::FrameBudget;
pub use lod::{apply_hysteresis, lod_from_distance, max_lod, DEFAULT_HYSTERESIS, DEFAULT_LOD_DISTANCES};
pub use config::StreamingConfig;
pub use strategy::{
    FrustumCullingStrategy, HierarchicalStrategy, LoadStrategy, RadiusStrategy, StrategyContext,
};
pub use queue::{GenerationEvent, GenerationQueue, QueueStats, RequestState};
pub use controller::{
    FrameReport, ResidentTileState, StreamingController, StreamingControllerBuilder, TilePhase,
};
