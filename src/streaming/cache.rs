//! Memory-bounded LRU cache for generated tiles
//!
//! Maps `(coordinate, lod)` to generated payloads. Accounting uses each
//! payload's size estimate; when an insertion would exceed the byte capacity
//! the least recently used entries are evicted first. Eviction is strictly by
//! access time, never by size or priority.
//!
//! The cache is shared between the frame thread and generation workers, so all
//! state sits behind a single lock covering the entry map, the recency order
//! and the size counter.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::tile::{TileBounds, TileCoord, TileKey, TilePayload};

struct CacheEntry<T> {
    payload: Arc<TilePayload<T>>,
    /// Position in the access order (larger = more recent)
    stamp: u64,
}

struct CacheState<T> {
    entries: HashMap<TileKey, CacheEntry<T>>,
    /// Access order: oldest first
    access_order: BTreeMap<u64, TileKey>,
    next_stamp: u64,
    size_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<T> CacheState<T> {
    fn touch(&mut self, key: TileKey) {
        let stamp = self.next_stamp;
        if let Some(entry) = self.entries.get_mut(&key) {
            self.access_order.remove(&entry.stamp);
            entry.stamp = stamp;
            self.access_order.insert(stamp, key);
            self.next_stamp += 1;
        }
    }

    fn remove(&mut self, key: &TileKey) -> Option<Arc<TilePayload<T>>> {
        let entry = self.entries.remove(key)?;
        self.access_order.remove(&entry.stamp);
        self.size_bytes = self.size_bytes.saturating_sub(entry.payload.size_bytes);
        Some(entry.payload)
    }

    fn evict_oldest(&mut self) -> Option<TileKey> {
        let (_, key) = self.access_order.pop_first()?;
        if let Some(entry) = self.entries.remove(&key) {
            self.size_bytes = self.size_bytes.saturating_sub(entry.payload.size_bytes);
        }
        self.evictions += 1;
        Some(key)
    }

    fn remove_where(&mut self, mut matches: impl FnMut(&TileKey) -> bool) -> usize {
        let doomed: Vec<TileKey> = self.entries.keys().filter(|k| matches(k)).copied().collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }
}

/// Snapshot of cache occupancy and effectiveness
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub size_bytes: usize,
    pub capacity_bytes: usize,
    /// Fraction of capacity in use (0.0 - 1.0, above 1.0 only for a lone oversized entry)
    pub utilization: f32,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate over all lookups (0.0 - 1.0)
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f32 / total as f32
    }
}

/// Thread-safe LRU cache of generated tiles with a byte budget
pub struct SpatialCache<T> {
    state: Mutex<CacheState<T>>,
    capacity_bytes: usize,
}

impl<T> SpatialCache<T> {
    /// Create a new cache
    ///
    /// # Arguments
    /// * `capacity_bytes` - Upper bound on the summed payload size estimates
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                access_order: BTreeMap::new(),
                next_stamp: 0,
                size_bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            capacity_bytes,
        }
    }

    /// Look up a tile, marking it most recently used on a hit.
    ///
    /// Returns a shared handle; repeated lookups return the same allocation.
    pub fn get(&self, key: &TileKey) -> Option<Arc<TilePayload<T>>> {
        let mut state = self.state.lock();
        let payload = state.entries.get(key).map(|entry| Arc::clone(&entry.payload));
        match payload {
            Some(payload) => {
                state.hits += 1;
                state.touch(*key);
                Some(payload)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Presence check that leaves the recency order untouched
    pub fn contains(&self, key: &TileKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Insert or replace a tile.
    ///
    /// Any existing entry for `key` is removed first. Least recently used
    /// entries are then evicted until the new payload fits. A payload larger
    /// than the whole capacity empties the cache and is still inserted, so
    /// callers must not rely on a later hit.
    ///
    /// # Returns
    /// Keys evicted to make room (not including a replaced entry)
    pub fn put(&self, key: TileKey, payload: Arc<TilePayload<T>>) -> Vec<TileKey> {
        let mut state = self.state.lock();
        state.remove(&key);

        let mut evicted = Vec::new();
        while state.size_bytes + payload.size_bytes > self.capacity_bytes {
            match state.evict_oldest() {
                Some(old) => evicted.push(old),
                None => break,
            }
        }

        if payload.size_bytes > self.capacity_bytes {
            log::warn!(
                "Tile {} ({} bytes) exceeds cache capacity of {} bytes",
                key, payload.size_bytes, self.capacity_bytes
            );
        }

        let stamp = state.next_stamp;
        state.next_stamp += 1;
        state.size_bytes += payload.size_bytes;
        state.access_order.insert(stamp, key);
        state.entries.insert(key, CacheEntry { payload, stamp });

        if !evicted.is_empty() {
            log::trace!("Cache evicted {} tiles to admit {}", evicted.len(), key);
        }
        evicted
    }

    /// Remove a single tile. Missing keys are ignored.
    pub fn invalidate(&self, key: &TileKey) -> bool {
        self.state.lock().remove(key).is_some()
    }

    /// Remove every LOD cached for a coordinate
    pub fn invalidate_by_coordinate(&self, coord: TileCoord) -> usize {
        self.state.lock().remove_where(|k| k.coord == coord)
    }

    /// Remove every tile whose coordinate lies in `bounds`
    pub fn invalidate_by_region(&self, bounds: TileBounds) -> usize {
        let removed = self.state.lock().remove_where(|k| bounds.contains(k.coord));
        log::debug!("Invalidated {} cached tiles in region {:?}", removed, bounds);
        removed
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.access_order.clear();
        state.size_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.state.lock().size_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Cached keys from least to most recently used
    pub fn keys_by_recency(&self) -> Vec<TileKey> {
        self.state.lock().access_order.values().copied().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let utilization = if self.capacity_bytes == 0 {
            0.0
        } else {
            state.size_bytes as f32 / self.capacity_bytes as f32
        };
        CacheStats {
            entry_count: state.entries.len(),
            size_bytes: state.size_bytes,
            capacity_bytes: self.capacity_bytes,
            utilization,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}
