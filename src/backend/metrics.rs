//! Polling metrics, adaptive throttling and the overlapping-tick gate

use crate::types::PollingStats;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Weight of the newest sample in the rolling average
const EWMA_ALPHA: f64 = 0.2;

/// Rolling per-session statistics
#[derive(Debug, Default)]
pub struct PollingMetrics {
    stats: PollingStats,
    completed: VecDeque<Instant>,
}

impl PollingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one finished tick
    pub fn record_tick(&mut self, duration: Duration, errors: u64, last_error: Option<String>) {
        self.record_tick_at(Instant::now(), duration, errors, last_error);
    }

    fn record_tick_at(
        &mut self,
        now: Instant,
        duration: Duration,
        errors: u64,
        last_error: Option<String>,
    ) {
        let ms = duration.as_secs_f64() * 1000.0;
        let stats = &mut self.stats;
        stats.last_poll_duration_ms = ms;
        stats.avg_poll_duration_ms = if stats.total_polls == 0 {
            ms
        } else {
            EWMA_ALPHA * ms + (1.0 - EWMA_ALPHA) * stats.avg_poll_duration_ms
        };
        stats.total_polls += 1;
        stats.error_count += errors;
        if last_error.is_some() {
            stats.last_error = last_error;
        }

        self.completed.push_back(now);
        while let Some(first) = self.completed.front() {
            if now.duration_since(*first) > Duration::from_secs(1) {
                self.completed.pop_front();
            } else {
                break;
            }
        }
        self.stats.polls_per_second = self.completed.len() as f64;
    }

    /// Account a tick dropped because the previous one was still running
    pub fn record_skip(&mut self) {
        self.stats.skipped_polls += 1;
    }

    pub fn snapshot(&self) -> PollingStats {
        self.stats.clone()
    }
}

/// Widens the tick delay under load and narrows it back when ticks are fast
#[derive(Debug, Clone)]
pub struct AdaptiveThrottle {
    base: Duration,
    current: Duration,
    max: Duration,
    enabled: bool,
    fast_threshold: u32,
    fast_streak: u32,
}

impl AdaptiveThrottle {
    pub fn new(base: Duration, enabled: bool, max_backoff_factor: f64, fast_threshold: u32) -> Self {
        let factor = if max_backoff_factor.is_finite() {
            max_backoff_factor.max(1.0)
        } else {
            1.0
        };
        Self {
            base,
            current: base,
            max: base.mul_f64(factor),
            enabled,
            fast_threshold: fast_threshold.max(1),
            fast_streak: 0,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Delay before the next tick given how long the last one took
    pub fn next_delay(&mut self, last_tick: Duration) -> Duration {
        if !self.enabled {
            return self.base;
        }

        if last_tick > self.base {
            self.fast_streak = 0;
            if last_tick > self.current {
                self.current = (self.current * 2).max(last_tick).min(self.max);
            }
        } else {
            self.fast_streak += 1;
            if self.fast_streak >= self.fast_threshold && self.current > self.base {
                self.current = (self.current / 2).max(self.base);
                self.fast_streak = 0;
            }
        }
        self.current
    }
}

/// Marks a tick as in flight
///
/// The timer acquires the gate before handing a tick to the reader, and the
/// reader releases it once the tick is finished. A failed acquire means the
/// previous tick has not completed yet.
#[derive(Debug, Default)]
pub struct TickGate {
    busy: AtomicBool,
}

impl TickGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}
