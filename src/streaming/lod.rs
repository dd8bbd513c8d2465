//! Level of Detail (LOD) selection with hysteresis
//!
//! Tiles are generated at coarser resolutions as they get further from the
//! viewpoint. LOD `n` covers distances from `thresholds[n - 1]` up to
//! `thresholds[n]`; anything beyond the last threshold uses the coarsest level.
//!
//! Switching exactly at a threshold makes a tile flip back and forth when the
//! viewpoint hovers near the boundary, so resident tiles only change level once
//! the distance clears the threshold by a margin (the hysteresis factor).

/// Default distance thresholds in world units
/// - LOD 0: 0-128
/// - LOD 1: 128-256
/// - LOD 2: 256-512
/// - LOD 3: 512-1024
/// - LOD 4: 1024+
pub const DEFAULT_LOD_DISTANCES: [f32; 4] = [128.0, 256.0, 512.0, 1024.0];

/// Default dead-zone around each threshold (10%)
pub const DEFAULT_HYSTERESIS: f32 = 0.1;

/// Calculate LOD level from distance
///
/// # Arguments
/// * `distance` - Distance from viewer to tile center
/// * `thresholds` - Ascending upper distance bound of each LOD band
///
/// # Returns
/// LOD level in `0..=thresholds.len()`
///
/// # Examples
/// ```
/// use terrastream::streaming::lod::{lod_from_distance, DEFAULT_LOD_DISTANCES};
///
/// assert_eq!(lod_from_distance(50.0, &DEFAULT_LOD_DISTANCES), 0);
/// assert_eq!(lod_from_distance(128.0, &DEFAULT_LOD_DISTANCES), 1);
/// assert_eq!(lod_from_distance(5000.0, &DEFAULT_LOD_DISTANCES), 4);
/// ```
pub fn lod_from_distance(distance: f32, thresholds: &[f32]) -> u32 {
    thresholds
        .iter()
        .position(|&max_dist| distance < max_dist)
        .unwrap_or(thresholds.len()) as u32
}

/// Coarsest LOD reachable with the given thresholds
pub fn max_lod(thresholds: &[f32]) -> u32 {
    thresholds.len() as u32
}

/// Apply hysteresis to a LOD change.
///
/// Coarsening past threshold `t` requires `distance > t * (1 + factor)`;
/// refining back across it requires `distance < t * (1 - factor)`. Multiple
/// levels may be crossed in one step when the distance clears each of them.
///
/// # Arguments
/// * `current` - LOD the tile is resident at
/// * `distance` - Current distance to the tile
/// * `thresholds` - Ascending LOD band limits
/// * `factor` - Hysteresis factor (0.0 disables the dead-zone)
///
/// # Returns
/// The LOD the tile should move to (may equal `current`)
///
/// # Examples
/// ```
/// use terrastream::streaming::lod::apply_hysteresis;
///
/// // 105 is past the 100 threshold but inside the dead-zone
/// assert_eq!(apply_hysteresis(0, 105.0, &[100.0], 0.1), 0);
/// assert_eq!(apply_hysteresis(0, 111.0, &[100.0], 0.1), 1);
/// // Coming back requires dropping below 90
/// assert_eq!(apply_hysteresis(1, 95.0, &[100.0], 0.1), 1);
/// assert_eq!(apply_hysteresis(1, 89.0, &[100.0], 0.1), 0);
/// ```
pub fn apply_hysteresis(current: u32, distance: f32, thresholds: &[f32], factor: f32) -> u32 {
    let factor = factor.max(0.0);
    let mut lod = current.min(max_lod(thresholds));

    while let Some(&threshold) = thresholds.get(lod as usize) {
        if distance > threshold * (1.0 + factor) {
            lod += 1;
        } else {
            break;
        }
    }
    if lod != current {
        return lod;
    }

    while lod > 0 {
        let threshold = thresholds[lod as usize - 1];
        if distance < threshold * (1.0 - factor) {
            lod -= 1;
        } else {
            break;
        }
    }
    lod
}
