//! Streaming configuration
//!
//! Plain parameters for a streaming session. Every field has a default so a
//! partial description (e.g. from a JSON settings blob) deserializes cleanly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::lod::{DEFAULT_HYSTERESIS, DEFAULT_LOD_DISTANCES};
use crate::core::{Error, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Edge length of a tile in world units
    pub tile_size: f32,
    /// Byte budget of the tile cache
    pub cache_capacity_bytes: usize,
    /// Generation jobs allowed in flight (also the worker thread count)
    pub max_concurrent_requests: usize,
    /// Load requests per frame, unless the strategy sets its own budget
    pub max_loads_per_frame: usize,
    /// Unloads per frame, unless the strategy sets its own budget
    pub max_unloads_per_frame: usize,
    /// Ascending LOD distance thresholds in world units
    pub lod_distances: Vec<f32>,
    /// Hysteresis dead-zone as a fraction of each threshold (0.0 - 1.0)
    pub hysteresis_factor: f32,
    /// Re-evaluate resident LODs every N frames
    pub lod_update_interval: u32,
    /// Time allowed per frame for applying completed tiles (ms)
    pub event_budget_ms: f32,
    /// Abort a generation batch that keeps the queue busy longer than this (ms)
    pub max_pipeline_duration_ms: Option<u64>,
    /// Height range used for tile bounding boxes `[min, max]`
    pub vertical_extent: [f32; 2],
    /// Loadable area as `[min_x, min_y, max_x, max_y]` tile coordinates (inclusive)
    pub world_bounds: Option<[i32; 4]>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            tile_size: 64.0,
            cache_capacity_bytes: 256 * 1024 * 1024, // 256 MB
            max_concurrent_requests: 4,
            max_loads_per_frame: 16,
            max_unloads_per_frame: 32,
            lod_distances: DEFAULT_LOD_DISTANCES.to_vec(),
            hysteresis_factor: DEFAULT_HYSTERESIS,
            lod_update_interval: 10,
            event_budget_ms: 4.0,
            max_pipeline_duration_ms: None,
            vertical_extent: [0.0, 256.0],
            world_bounds: None,
        }
    }
}

impl StreamingConfig {
    pub fn event_budget(&self) -> Duration {
        Duration::from_secs_f32(self.event_budget_ms.max(0.0) / 1000.0)
    }

    pub fn max_pipeline_duration(&self) -> Option<Duration> {
        self.max_pipeline_duration_ms.map(Duration::from_millis)
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        if !(self.tile_size > 0.0) {
            return Err(Error::Config(format!("tile_size must be positive, got {}", self.tile_size)));
        }
        if self.max_concurrent_requests == 0 {
            return Err(Error::Config("max_concurrent_requests must be at least 1".into()));
        }
        if self.max_loads_per_frame == 0 || self.max_unloads_per_frame == 0 {
            return Err(Error::Config("per-frame load and unload budgets must be at least 1".into()));
        }
        if self.lod_update_interval == 0 {
            return Err(Error::Config("lod_update_interval must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.hysteresis_factor) {
            return Err(Error::Config(format!(
                "hysteresis_factor must be in [0, 1), got {}",
                self.hysteresis_factor
            )));
        }
        if self.lod_distances.windows(2).any(|w| w[0] >= w[1])
            || self.lod_distances.iter().any(|d| !(*d > 0.0))
        {
            return Err(Error::Config(format!(
                "lod_distances must be positive and strictly ascending, got {:?}",
                self.lod_distances
            )));
        }
        if self.vertical_extent[0] > self.vertical_extent[1] {
            return Err(Error::Config("vertical_extent min exceeds max".into()));
        }
        if let Some([min_x, min_y, max_x, max_y]) = self.world_bounds {
            if min_x > max_x || min_y > max_y {
                return Err(Error::Config("world_bounds min exceeds max".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(StreamingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            StreamingConfig { tile_size: 0.0, ..Default::default() },
            StreamingConfig { max_concurrent_requests: 0, ..Default::default() },
            StreamingConfig { lod_update_interval: 0, ..Default::default() },
            StreamingConfig { max_loads_per_frame: 0, ..Default::default() },
            StreamingConfig { hysteresis_factor: 1.5, ..Default::default() },
            StreamingConfig { lod_distances: vec![100.0, 50.0], ..Default::default() },
            StreamingConfig { vertical_extent: [10.0, 0.0], ..Default::default() },
            StreamingConfig { world_bounds: Some([5, 0, 0, 5]), ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{:?}", config);
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: StreamingConfig =
            serde_json::from_str(r#"{ "tile_size": 32.0, "hysteresis_factor": 0.2 }"#).unwrap();
        assert_eq!(config.tile_size, 32.0);
        assert_eq!(config.hysteresis_factor, 0.2);
        assert_eq!(config.max_concurrent_requests, 4);
        assert_eq!(config.lod_distances, DEFAULT_LOD_DISTANCES.to_vec());
    }

    #[test]
    fn test_durations() {
        let config = StreamingConfig {
            event_budget_ms: 2.5,
            max_pipeline_duration_ms: Some(1500),
            ..Default::default()
        };
        assert!((config.event_budget().as_secs_f64() - 0.0025).abs() < 1e-6);
        assert_eq!(config.max_pipeline_duration(), Some(Duration::from_millis(1500)));
    }
}
