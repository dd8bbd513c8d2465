//! Error types for the streaming engine
//!
//! Only programmer-error configuration surfaces through [`Error`]. Runtime
//! problems (generation failures, stale results, cache pressure) are reported
//! as events or resolved internally and never reach the caller as an `Err`.

use thiserror::Error;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
