//! Schedulers
//!
//! Two run modes over the same matrix and lock store: a sequential mode
//! for supervised setup flows, and a concurrent mode with a bounded
//! worker pool, FIFO admission and staggered launches.

mod concurrent;
mod sequential;

pub use concurrent::ConcurrentScheduler;
pub use sequential::{Gate, NoGate, SequentialScheduler, TimedGate};

use crate::error::SkipReason;

/// What happened to each profile in a run. The scheduler always drains
/// its whole queue; per-profile failures land here instead of aborting.
#[derive(Debug, Default)]
pub struct RunReport {
    pub completed: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn record_completed(&mut self, name: impl Into<String>) {
        self.completed.push(name.into());
    }

    pub fn record_skipped(&mut self, name: impl Into<String>, reason: SkipReason) {
        self.skipped.push((name.into(), reason));
    }
}
