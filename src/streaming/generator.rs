//! Collaborator interfaces: content generation and presentation
//!
//! The streaming machinery never looks inside tile content. It asks a
//! [`ContentGenerator`] to produce payloads on worker threads and hands the
//! results to a [`PresentationSink`] on the frame thread.

use std::sync::Arc;

use thiserror::Error;

use super::executor::ExecutorError;
use super::tile::{TileCoord, TileKey, TilePayload};

/// Why a tile could not be generated
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error("generation failed: {0}")]
    Failed(String),

    #[error("generator panicked: {0}")]
    Panicked(String),

    #[error("privileged operation failed: {0}")]
    Executor(#[from] ExecutorError),
}

/// Produces tile content.
///
/// Called concurrently from worker threads for different tiles. Work that must
/// run on the privileged thread has to go through a
/// [`CrossThreadExecutor`](super::executor::CrossThreadExecutor) handle owned by
/// the implementation.
pub trait ContentGenerator: Send + Sync + 'static {
    type Content: Send + Sync + 'static;

    /// Generate one tile.
    ///
    /// # Arguments
    /// * `coord` - Tile grid coordinate
    /// * `world_extent` - Edge length of the tile in world units
    /// * `lod` - Detail level, 0 = finest
    fn generate(
        &self,
        coord: TileCoord,
        world_extent: f32,
        lod: u32,
    ) -> Result<TilePayload<Self::Content>, GenerationError>;
}

impl<G: ContentGenerator> ContentGenerator for Arc<G> {
    type Content = G::Content;

    fn generate(
        &self,
        coord: TileCoord,
        world_extent: f32,
        lod: u32,
    ) -> Result<TilePayload<Self::Content>, GenerationError> {
        (**self).generate(coord, world_extent, lod)
    }
}

/// Receives resident-set changes on the frame thread
pub trait PresentationSink<T> {
    /// A tile became resident, or was replaced by a different LOD
    fn on_tile_ready(&mut self, coord: TileCoord, lod: u32, payload: Arc<TilePayload<T>>);

    /// A tile left the resident set
    fn on_tile_removed(&mut self, coord: TileCoord);

    /// Generation failed; the tile stays at its previous state
    fn on_tile_failed(&mut self, _key: TileKey, _reason: &GenerationError) {}
}

/// Sink that ignores everything, for headless runs
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl<T> PresentationSink<T> for NullSink {
    fn on_tile_ready(&mut self, _coord: TileCoord, _lod: u32, _payload: Arc<TilePayload<T>>) {}

    fn on_tile_removed(&mut self, _coord: TileCoord) {}
}
