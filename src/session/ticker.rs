//! Periodic-task abstraction driving the measurement cadence
//!
//! The session loop is decoupled from any rendering refresh mechanism: the
//! controller consumes timestamps, and this ticker produces them on a fixed
//! interval, tolerant of timer jitter. A headless harness can drive the
//! same controller by supplying timestamps directly.

use std::time::{Duration, Instant};

/// Fixed-interval ticker with a monotonic schedule
///
/// `wait` sleeps until the next scheduled tick and returns milliseconds
/// elapsed since the ticker epoch. When a tick is serviced late the
/// schedule resynchronizes instead of bursting to catch up, so timestamps
/// stay monotonically non-decreasing and roughly evenly spaced.
pub struct IntervalTicker {
    period: Duration,
    epoch: Instant,
    next: Instant,
}

impl IntervalTicker {
    /// Create a ticker firing every `period`, with the epoch at creation
    pub fn new(period: Duration) -> Self {
        let now = Instant::now();
        Self {
            period,
            epoch: now,
            next: now,
        }
    }

    /// Block until the next tick; returns ms since the epoch
    pub fn wait(&mut self) -> i64 {
        let now = Instant::now();
        if now < self.next {
            std::thread::sleep(self.next - now);
        }

        let fired = Instant::now();
        self.next += self.period;
        if self.next < fired {
            // Fell behind by more than a period: resync rather than burst
            self.next = fired + self.period;
        }

        self.epoch.elapsed().as_millis() as i64
    }

    /// Interval between ticks
    pub fn period(&self) -> Duration {
        self.period
    }
}
