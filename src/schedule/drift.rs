//! Cycle latency tracking

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::window::TimeWindow;

/// Processing latency of the most recent cycle.
///
/// The next window's start is pulled back by this amount so that a slow
/// cycle does not leave a gap between consecutive windows. Shared by all
/// cycles of the process; the lock is only held for the single read or
/// write, never across I/O.
#[derive(Debug, Default)]
pub struct DriftTracker {
    drift: Mutex<Duration>,
}

impl DriftTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current drift correction
    pub fn current(&self) -> Duration {
        *self.drift.lock()
    }

    /// Replace the drift with the time elapsed since `cycle_start`
    pub fn record_elapsed(&self, cycle_start: Instant) -> Duration {
        let elapsed = cycle_start.elapsed();
        self.record(elapsed);
        elapsed
    }

    /// Replace (not accumulate) the drift
    pub fn record(&self, elapsed: Duration) {
        *self.drift.lock() = elapsed;
    }

    /// Window for a cycle starting at `now`
    pub fn window(&self, now: DateTime<Utc>, lookback_minutes: u32) -> TimeWindow {
        TimeWindow::calculate(now, lookback_minutes, self.current())
    }
}
