//! Heartbeat accounting.
//!
//! The monitor is driven by the channel tick with real elapsed time. It only
//! decides; the channel sends the heartbeat or closes the connection.

use std::time::Duration;

/// What the channel should do after a heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatAction {
    /// Interval not reached or heartbeats disabled
    Idle,
    /// Send a heartbeat; `prior_misses` is the count before this interval
    Send { prior_misses: u32 },
    /// Miss threshold exceeded
    Close { miss_count: u32 },
}

/// Per-channel heartbeat counters
#[derive(Debug)]
pub(crate) struct HeartbeatState {
    interval: Duration,
    elapsed: Duration,
    miss_count: u32,
}

impl HeartbeatState {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            elapsed: Duration::ZERO,
            miss_count: 0,
        }
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Zero disables heartbeats
    pub(crate) fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub(crate) fn miss_count(&self) -> u32 {
        self.miss_count
    }

    /// Time accumulated toward the next interval
    pub(crate) fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Advance by `delta`; closes once the miss count exceeds `threshold`
    pub(crate) fn tick(&mut self, delta: Duration, threshold: u32) -> HeartbeatAction {
        if self.interval.is_zero() {
            return HeartbeatAction::Idle;
        }

        self.elapsed += delta;
        if self.elapsed < self.interval {
            return HeartbeatAction::Idle;
        }

        let prior_misses = self.miss_count;
        self.elapsed = Duration::ZERO;
        self.miss_count = self.miss_count.saturating_add(1);

        if self.miss_count > threshold {
            HeartbeatAction::Close {
                miss_count: self.miss_count,
            }
        } else {
            HeartbeatAction::Send { prior_misses }
        }
    }

    /// Inbound packet arrived
    pub(crate) fn on_receive(&mut self) {
        self.miss_count = 0;
        self.elapsed = Duration::ZERO;
    }

    pub(crate) fn reset(&mut self) {
        self.miss_count = 0;
        self.elapsed = Duration::ZERO;
    }
}
