//! Per-frame operation budgets
//!
//! Bounds how much streaming work a single frame may issue: a count of load
//! requests, a count of unloads, and a wall-clock allowance for draining
//! completed work.

use std::time::{Duration, Instant};

/// Operation and time budget for one controller update
#[derive(Debug)]
pub struct FrameBudget {
    started: Instant,
    time_budget: Duration,
    max_loads: usize,
    max_unloads: usize,
    loads_used: usize,
    unloads_used: usize,
}

impl FrameBudget {
    /// Start a budget for the current frame
    ///
    /// # Arguments
    /// * `time_budget` - Wall-clock allowance measured from now
    /// * `max_loads` - Load requests allowed this frame
    /// * `max_unloads` - Unloads allowed this frame
    pub fn new(time_budget: Duration, max_loads: usize, max_unloads: usize) -> Self {
        Self {
            started: Instant::now(),
            time_budget,
            max_loads,
            max_unloads,
            loads_used: 0,
            unloads_used: 0,
        }
    }

    // --- Consumption ---

    /// Claim one load slot; false once the frame's loads are spent
    pub fn try_load(&mut self) -> bool {
        if self.loads_used >= self.max_loads {
            return false;
        }
        self.loads_used += 1;
        true
    }

    /// Claim one unload slot; false once the frame's unloads are spent
    pub fn try_unload(&mut self) -> bool {
        if self.unloads_used >= self.max_unloads {
            return false;
        }
        self.unloads_used += 1;
        true
    }

    // --- Queries ---

    pub fn loads_remaining(&self) -> usize {
        self.max_loads.saturating_sub(self.loads_used)
    }

    pub fn unloads_remaining(&self) -> usize {
        self.max_unloads.saturating_sub(self.unloads_used)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// True once the wall-clock allowance is used up
    pub fn time_exhausted(&self) -> bool {
        self.elapsed() >= self.time_budget
    }
}
