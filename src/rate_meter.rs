//! Rolling-window measurement of the achieved sample rate.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Counts events inside a sliding time window.
///
/// Each [`mark`](RateMeter::mark) records one delivered sample. The rate is the
/// number of marks younger than the window, divided by the window length.
#[derive(Debug, Clone)]
pub struct RateMeter {
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl RateMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            stamps: VecDeque::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn mark(&mut self) {
        self.mark_at(Instant::now());
    }

    pub fn mark_at(&mut self, at: Instant) {
        self.stamps.push_back(at);
        self.expire(at);
    }

    /// Samples per second over the window ending now.
    pub fn rate(&mut self) -> f64 {
        self.rate_at(Instant::now())
    }

    pub fn rate_at(&mut self, now: Instant) -> f64 {
        self.expire(now);
        if self.window.is_zero() {
            return 0.0;
        }
        self.stamps.len() as f64 / self.window.as_secs_f64()
    }

    pub fn reset(&mut self) {
        self.stamps.clear();
    }

    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.stamps.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }
}
