use std::time::{Duration, Instant};

/// A repeating interval timer.
pub struct Timer {
    interval: Duration,
    last: Instant,
}

impl Timer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    /// Whether the interval has elapsed since the last reset.
    pub fn ringing(&self) -> bool {
        self.last.elapsed() >= self.interval
    }

    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    /// Push the next ring out by `extra` beyond the normal interval.
    pub fn delay(&mut self, extra: Duration) {
        self.last = Instant::now() + extra;
    }
}
