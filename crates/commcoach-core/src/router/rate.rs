//! Sliding-window request counter for the quota-limited tier.
//!
//! Advisory only: an exhausted window moves the provider to the back of the
//! priority list, it never blocks a request.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Window sizes and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub per_minute: usize,
    pub per_day: usize,
    pub minute_window: Duration,
    pub day_window: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_minute: 15,
            per_day: 1500,
            minute_window: Duration::from_secs(60),
            day_window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Window counts against their limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateUsage {
    pub per_minute: usize,
    pub per_minute_limit: usize,
    pub per_day: usize,
    pub per_day_limit: usize,
}

impl RateUsage {
    pub fn has_capacity(&self) -> bool {
        self.per_minute < self.per_minute_limit && self.per_day < self.per_day_limit
    }
}

#[derive(Debug, Default)]
struct RateWindow {
    per_minute: VecDeque<Instant>,
    per_day: VecDeque<Instant>,
}

fn prune(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(&oldest) = window.front() {
        if now.saturating_duration_since(oldest) >= span {
            window.pop_front();
        } else {
            break;
        }
    }
}

fn count_within(window: &VecDeque<Instant>, now: Instant, span: Duration) -> usize {
    window
        .iter()
        .filter(|&&t| now.saturating_duration_since(t) < span)
        .count()
}

pub struct RateTracker {
    limits: RateLimits,
    window: Mutex<RateWindow>,
}

impl RateTracker {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            window: Mutex::new(RateWindow::default()),
        }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    pub fn can_use(&self) -> bool {
        self.can_use_at(Instant::now())
    }

    /// Drop expired entries, then check both windows have room.
    pub fn can_use_at(&self, now: Instant) -> bool {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut window.per_minute, now, self.limits.minute_window);
        prune(&mut window.per_day, now, self.limits.day_window);
        window.per_minute.len() < self.limits.per_minute && window.per_day.len() < self.limits.per_day
    }

    pub fn record_use(&self) {
        self.record_use_at(Instant::now());
    }

    pub fn record_use_at(&self, now: Instant) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.per_minute.push_back(now);
        window.per_day.push_back(now);
    }

    /// Counts as `can_use_at(now)` would see them, without pruning.
    pub fn usage_at(&self, now: Instant) -> RateUsage {
        let window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        RateUsage {
            per_minute: count_within(&window.per_minute, now, self.limits.minute_window),
            per_minute_limit: self.limits.per_minute,
            per_day: count_within(&window.per_day, now, self.limits.day_window),
            per_day_limit: self.limits.per_day,
        }
    }

    pub fn reset(&self) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.per_minute.clear();
        window.per_day.clear();
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new(RateLimits::default())
    }
}
