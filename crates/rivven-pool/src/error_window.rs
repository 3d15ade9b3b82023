//! Sliding-window failure counter
//!
//! Counts send/connect failures inside a window of fixed length. The window
//! rolls lazily: the first failure reported after the window expired starts
//! a new one instead of inheriting the stale count. Two bursts closer than
//! the window length accumulate and can cross the threshold together.

use std::time::{Duration, Instant};

/// Failure counter feeding reconnect decisions
#[derive(Debug, Clone)]
pub struct ErrorWindow {
    window: Duration,
    threshold: u64,
    error_count: u64,
    window_start: Option<Instant>,
}

impl ErrorWindow {
    /// Create a window of the given length that trips above `threshold` failures
    pub fn new(window: Duration, threshold: u64) -> Self {
        Self {
            window,
            threshold,
            error_count: 0,
            window_start: None,
        }
    }

    /// Change window length and threshold, keeping the current count
    pub fn reconfigure(&mut self, window: Duration, threshold: u64) {
        self.window = window;
        self.threshold = threshold;
    }

    /// Record one failure at `now`.
    ///
    /// Returns `true` when the count is above the threshold.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        let expired = self
            .window_start
            .map_or(true, |start| now.saturating_duration_since(start) > self.window);

        if expired {
            self.error_count = 0;
            self.window_start = Some(now);
        }

        self.error_count += 1;
        self.error_count > self.threshold
    }

    /// Forget all failures (after a successful connect)
    pub fn reset(&mut self) {
        self.error_count = 0;
        self.window_start = None;
    }

    /// Failures counted in the current window
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
