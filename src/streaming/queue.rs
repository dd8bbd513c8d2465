//! Prioritized generation queue with bounded concurrency
//!
//! Requests wait in a priority order (lower value = more urgent, ties broken by
//! arrival). Up to `max_concurrent` of them run at once on a dedicated worker
//! pool. Each job checks the [`SpatialCache`] before calling the generator and
//! reports its outcome through an event channel that the frame thread drains.
//!
//! Cancellation never preempts a running job: an in-flight request is only
//! marked cancelled and its result is dropped when it finishes.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::cache::SpatialCache;
use super::generator::{ContentGenerator, GenerationError};
use super::tile::{TileKey, TilePayload};
use crate::core::Result;

/// Lifecycle of a generation request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    /// Waiting for a worker slot
    Pending,
    /// Running on a worker
    InProgress,
    /// Finished successfully
    Completed,
    /// Cancelled while running; the result will be discarded
    Cancelled,
    /// Generation failed
    Failed,
}

#[derive(Clone, Debug)]
struct Request {
    priority: f32,
    state: RequestState,
    seq: u64,
    created_at: Instant,
}

/// Dispatch ordering key: priority first, then arrival
#[derive(Clone, Copy, Debug)]
struct DispatchOrder {
    priority: f32,
    seq: u64,
}

impl PartialEq for DispatchOrder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DispatchOrder {}

impl Ord for DispatchOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for DispatchOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of a generation job, delivered to the frame thread
#[derive(Debug)]
pub enum GenerationEvent<T> {
    Completed {
        key: TileKey,
        payload: Arc<TilePayload<T>>,
        /// Served from the cache without calling the generator
        from_cache: bool,
        /// Time from request creation to resolution
        latency: Duration,
    },
    Failed {
        key: TileKey,
        reason: GenerationError,
    },
}

impl<T> GenerationEvent<T> {
    pub fn key(&self) -> TileKey {
        match self {
            Self::Completed { key, .. } | Self::Failed { key, .. } => *key,
        }
    }
}

/// Request counters, current and lifetime
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Waiting for a worker
    pub pending: usize,
    /// Occupying a worker slot (includes cancelled jobs still running)
    pub active: usize,
    pub requested_total: u64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub cancelled_total: u64,
    pub cache_hits_total: u64,
}

struct QueueState {
    requests: HashMap<TileKey, Request>,
    pending_order: BTreeMap<DispatchOrder, TileKey>,
    in_flight: usize,
    next_seq: u64,
    paused: bool,
    closed: bool,
    stats: QueueStats,
}

impl QueueState {
    fn remove_pending(&mut self, key: &TileKey) -> bool {
        match self.requests.get(key) {
            Some(request) if request.state == RequestState::Pending => {
                let order = DispatchOrder { priority: request.priority, seq: request.seq };
                self.pending_order.remove(&order);
                self.requests.remove(key);
                true
            }
            _ => false,
        }
    }

    fn set_pending_priority(&mut self, key: TileKey, priority: f32) {
        if let Some(request) = self.requests.get_mut(&key) {
            let old = DispatchOrder { priority: request.priority, seq: request.seq };
            request.priority = priority;
            self.pending_order.remove(&old);
            self.pending_order.insert(DispatchOrder { priority, seq: request.seq }, key);
        }
    }
}

struct Shared<G: ContentGenerator> {
    state: Mutex<QueueState>,
    generator: G,
    cache: Arc<SpatialCache<G::Content>>,
    events: mpsc::UnboundedSender<GenerationEvent<G::Content>>,
    pool: rayon::ThreadPool,
    max_concurrent: usize,
    tile_size: f32,
}

/// Concurrency-limited, priority-ordered generation queue
pub struct GenerationQueue<G: ContentGenerator> {
    shared: Arc<Shared<G>>,
    events: mpsc::UnboundedReceiver<GenerationEvent<G::Content>>,
}

impl<G: ContentGenerator> GenerationQueue<G> {
    /// Create a queue with its own worker pool
    ///
    /// # Arguments
    /// * `generator` - Content generator shared by all workers
    /// * `cache` - Cache consulted before generating and filled afterwards
    /// * `max_concurrent` - Jobs allowed in flight (and worker thread count)
    /// * `tile_size` - World extent passed to the generator
    pub fn new(
        generator: G,
        cache: Arc<SpatialCache<G::Content>>,
        max_concurrent: usize,
        tile_size: f32,
    ) -> Result<Self> {
        let max_concurrent = max_concurrent.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_concurrent)
            .thread_name(|i| format!("tile-gen-{}", i))
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel();

        log::debug!("Generation queue started with {} workers", max_concurrent);

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    requests: HashMap::new(),
                    pending_order: BTreeMap::new(),
                    in_flight: 0,
                    next_seq: 0,
                    paused: false,
                    closed: false,
                    stats: QueueStats::default(),
                }),
                generator,
                cache,
                events: tx,
                pool,
                max_concurrent,
                tile_size,
            }),
            events: rx,
        })
    }

    /// Request generation of a tile.
    ///
    /// An existing active request for the same key absorbs this one, keeping
    /// the more urgent (lower) priority. A cancelled job that is still running
    /// is reinstated instead of starting a second one.
    ///
    /// # Returns
    /// True if a new request was queued
    pub fn request(&self, key: TileKey, priority: f32) -> bool {
        {
            let mut state = self.shared.state.lock();
            match state.requests.get(&key).map(|r| (r.state, r.priority)) {
                Some((RequestState::Pending, current)) => {
                    if priority < current {
                        state.set_pending_priority(key, priority);
                    }
                    return false;
                }
                Some((RequestState::Cancelled, _)) => {
                    // The only backward state move: the job is still running,
                    // so reviving it keeps one active request per key
                    if let Some(request) = state.requests.get_mut(&key) {
                        request.state = RequestState::InProgress;
                    }
                    log::trace!("Reinstated cancelled in-flight request {}", key);
                    return false;
                }
                Some(_) => return false,
                None => {}
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.requests.insert(key, Request {
                priority,
                state: RequestState::Pending,
                seq,
                created_at: Instant::now(),
            });
            state.pending_order.insert(DispatchOrder { priority, seq }, key);
            state.stats.requested_total += 1;
        }

        Self::dispatch(&self.shared);
        true
    }

    /// Cancel a request.
    ///
    /// Pending requests are dropped before any work starts. Running requests
    /// finish, but their result is discarded.
    ///
    /// # Returns
    /// True if an active request was cancelled
    pub fn cancel(&self, key: &TileKey) -> bool {
        let mut state = self.shared.state.lock();
        if state.remove_pending(key) {
            state.stats.cancelled_total += 1;
            log::trace!("Cancelled pending request {}", key);
            return true;
        }
        match state.requests.get_mut(key) {
            Some(request) if request.state == RequestState::InProgress => {
                request.state = RequestState::Cancelled;
                state.stats.cancelled_total += 1;
                log::trace!("Cancelled in-flight request {}", key);
                true
            }
            _ => false,
        }
    }

    /// Drop every pending request
    pub fn cancel_all_pending(&self) -> usize {
        let mut state = self.shared.state.lock();
        let keys: Vec<TileKey> = state.pending_order.values().copied().collect();
        for key in &keys {
            state.requests.remove(key);
        }
        state.pending_order.clear();
        state.stats.cancelled_total += keys.len() as u64;
        keys.len()
    }

    /// Drop every pending request and mark running ones cancelled
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = self.cancel_all_pending();
        let mut state = self.shared.state.lock();
        let mut running = 0;
        for request in state.requests.values_mut() {
            if request.state == RequestState::InProgress {
                request.state = RequestState::Cancelled;
                running += 1;
            }
        }
        state.stats.cancelled_total += running;
        cancelled += running as usize;
        cancelled
    }

    /// Change the priority of a pending request (either direction)
    pub fn update_priority(&self, key: &TileKey, priority: f32) -> bool {
        let mut state = self.shared.state.lock();
        match state.requests.get(key) {
            Some(request) if request.state == RequestState::Pending => {
                state.set_pending_priority(*key, priority);
                true
            }
            _ => false,
        }
    }

    /// Suspend or resume dispatching. Queued requests are kept while paused.
    pub fn set_paused(&self, paused: bool) {
        self.shared.state.lock().paused = paused;
        if !paused {
            Self::dispatch(&self.shared);
        }
    }

    /// Next completed or failed job, if any
    pub fn poll_event(&mut self) -> Option<GenerationEvent<G::Content>> {
        self.events.try_recv().ok()
    }

    // --- Queries ---

    /// True while the key has a pending or running (not cancelled) request
    pub fn has_pending(&self, key: &TileKey) -> bool {
        matches!(
            self.request_state(key),
            Some(RequestState::Pending | RequestState::InProgress)
        )
    }

    pub fn request_state(&self, key: &TileKey) -> Option<RequestState> {
        self.shared.state.lock().requests.get(key).map(|r| r.state)
    }

    pub fn request_priority(&self, key: &TileKey) -> Option<f32> {
        self.shared.state.lock().requests.get(key).map(|r| r.priority)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending_order.len()
    }

    pub fn active_count(&self) -> usize {
        self.shared.state.lock().in_flight
    }

    /// Pending plus running requests
    pub fn total_count(&self) -> usize {
        let state = self.shared.state.lock();
        state.pending_order.len() + state.in_flight
    }

    pub fn is_idle(&self) -> bool {
        self.total_count() == 0
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.max_concurrent
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock();
        QueueStats {
            pending: state.pending_order.len(),
            active: state.in_flight,
            ..state.stats
        }
    }

    pub fn cache(&self) -> &Arc<SpatialCache<G::Content>> {
        &self.shared.cache
    }

    pub fn generator(&self) -> &G {
        &self.shared.generator
    }

    // --- Workers ---

    /// Start pending requests until the concurrency limit is reached
    fn dispatch(shared: &Arc<Shared<G>>) {
        let started: Vec<TileKey> = {
            let mut state = shared.state.lock();
            let mut started = Vec::new();
            while !state.paused && !state.closed && state.in_flight < shared.max_concurrent {
                let Some((_, key)) = state.pending_order.pop_first() else {
                    break;
                };
                if let Some(request) = state.requests.get_mut(&key) {
                    request.state = RequestState::InProgress;
                    state.in_flight += 1;
                    started.push(key);
                }
            }
            started
        };

        for key in started {
            let worker = Arc::clone(shared);
            shared.pool.spawn(move || Self::run_job(worker, key));
        }
    }

    fn run_job(shared: Arc<Shared<G>>, key: TileKey) {
        let outcome = match shared.cache.get(&key) {
            Some(payload) => Ok((payload, true)),
            None => {
                let generated = panic::catch_unwind(AssertUnwindSafe(|| {
                    shared.generator.generate(key.coord, shared.tile_size, key.lod)
                }))
                .unwrap_or_else(|panic| Err(GenerationError::Panicked(panic_message(panic.as_ref()))));

                generated.map(|payload| {
                    let payload = Arc::new(payload);
                    shared.cache.put(key, Arc::clone(&payload));
                    (payload, false)
                })
            }
        };

        Self::resolve(&shared, key, outcome);
        Self::dispatch(&shared);
    }

    fn resolve(
        shared: &Shared<G>,
        key: TileKey,
        outcome: std::result::Result<(Arc<TilePayload<G::Content>>, bool), GenerationError>,
    ) {
        let mut state = shared.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        let Some(mut request) = state.requests.remove(&key) else {
            return;
        };
        if request.state == RequestState::Cancelled {
            log::trace!("Discarding result of cancelled request {}", key);
            return;
        }

        let event = match outcome {
            Ok((payload, from_cache)) => {
                request.state = RequestState::Completed;
                state.stats.completed_total += 1;
                if from_cache {
                    state.stats.cache_hits_total += 1;
                }
                GenerationEvent::Completed {
                    key,
                    payload,
                    from_cache,
                    latency: request.created_at.elapsed(),
                }
            }
            Err(reason) => {
                request.state = RequestState::Failed;
                state.stats.failed_total += 1;
                log::warn!("Generation of {} failed: {}", key, reason);
                GenerationEvent::Failed { key, reason }
            }
        };
        log::trace!("Request {} resolved as {:?}", key, request.state);

        // Sent under the lock so event order matches request bookkeeping
        let _ = shared.events.send(event);
    }
}

impl<G: ContentGenerator> Drop for GenerationQueue<G> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        let keys: Vec<TileKey> = state.pending_order.values().copied().collect();
        for key in keys {
            state.requests.remove(&key);
        }
        state.pending_order.clear();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
