//! Test doubles shared by the streaming unit tests

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::generator::{ContentGenerator, GenerationError, PresentationSink};
use super::tile::{TileCoord, TileKey, TilePayload};

/// Poll `condition` until it holds, panicking after a few seconds
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Blocks generator calls until opened
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn closed() -> Self {
        Self { open: Mutex::new(false), cv: Condvar::new() }
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.cv.notify_all();
    }

    pub fn close(&self) {
        *self.open.lock() = false;
    }

    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cv.wait(&mut open);
        }
    }
}

/// Generator whose content is the key it was asked for
pub struct TestGenerator {
    payload_size: usize,
    gate: Option<Arc<Gate>>,
    calls: Mutex<Vec<TileKey>>,
    failing: Mutex<HashSet<TileCoord>>,
    panicking: Mutex<HashSet<TileCoord>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl TestGenerator {
    pub fn new(payload_size: usize) -> Self {
        Self {
            payload_size,
            gate: None,
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn fail_at(&self, coord: TileCoord) {
        self.failing.lock().insert(coord);
    }

    pub fn panic_at(&self, coord: TileCoord) {
        self.panicking.lock().insert(coord);
    }

    pub fn calls(&self) -> Vec<TileKey> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl ContentGenerator for TestGenerator {
    type Content = TileKey;

    fn generate(
        &self,
        coord: TileCoord,
        _world_extent: f32,
        lod: u32,
    ) -> Result<TilePayload<TileKey>, GenerationError> {
        let key = TileKey::new(coord, lod);
        self.calls.lock().push(key);

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.lock().contains(&coord) {
            panic!("test generator panic at {}", coord);
        }
        if self.failing.lock().contains(&coord) {
            return Err(GenerationError::Failed(format!("no data for {}", coord)));
        }
        Ok(TilePayload::new(key, self.payload_size))
    }
}

/// Sink that records every notification
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub ready: Vec<(TileCoord, u32)>,
    pub removed: Vec<TileCoord>,
    pub failed: Vec<TileKey>,
}

impl<T> PresentationSink<T> for RecordingSink {
    fn on_tile_ready(&mut self, coord: TileCoord, lod: u32, _payload: Arc<TilePayload<T>>) {
        self.ready.push((coord, lod));
    }

    fn on_tile_removed(&mut self, coord: TileCoord) {
        self.removed.push(coord);
    }

    fn on_tile_failed(&mut self, key: TileKey, _reason: &GenerationError) {
        self.failed.push(key);
    }
}
