//! Fixed-window rate limiting
//!
//! Each key gets a counter inside a fixed window anchored at its first hit.
//! Once the window elapses the next hit anchors a fresh one, so a burst at a
//! window boundary can briefly reach twice the per-window capacity. That is
//! accepted behavior for both limiter instances the bot runs.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// One key's position inside its current window
#[derive(Debug, Clone, Copy)]
struct WindowSlot {
    /// When the current window opened
    window_start: DateTime<Utc>,
    /// Hits recorded inside the current window
    hits: u32,
}

/// A fixed-window rate limiter keyed by channel or user id
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

#[derive(Debug)]
struct LimiterInner {
    /// Hits allowed per window
    capacity: u32,
    /// Window length
    window: Duration,
    /// Per-key window state
    slots: DashMap<u64, WindowSlot>,
}

impl RateLimiter {
    /// Create a limiter allowing `capacity` hits per `window_seconds` window
    #[must_use]
    pub fn new(capacity: u32, window_seconds: i64) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                capacity,
                window: Duration::seconds(window_seconds),
                slots: DashMap::new(),
            }),
        }
    }

    /// Record a hit for `key` at `now` and report whether it fit the window.
    ///
    /// Returns true and counts the hit while the key is under capacity.
    /// Returns false without extending the window once the key is exhausted,
    /// so an exhausted key recovers as soon as its window ends.
    ///
    /// The check and the count are one step under the per-key entry lock,
    /// so two hits cannot both observe the last free slot.
    pub fn try_acquire_at(&self, key: u64, now: DateTime<Utc>) -> bool {
        let mut slot = self
            .inner
            .slots
            .entry(key)
            .or_insert_with(|| WindowSlot {
                window_start: now,
                hits: 0,
            });

        if now - slot.window_start >= self.inner.window {
            slot.window_start = now;
            slot.hits = 0;
        }

        if slot.hits < self.inner.capacity {
            slot.hits += 1;
            true
        } else {
            false
        }
    }

    /// Record a hit for `key` at the current time
    pub fn try_acquire(&self, key: u64) -> bool {
        self.try_acquire_at(key, Utc::now())
    }

    /// Drop a key's window state
    pub fn reset(&self, key: u64) {
        self.inner.slots.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: DateTime<Utc>, offset_secs: i64) -> DateTime<Utc> {
        base + Duration::seconds(offset_secs)
    }

    #[test]
    fn test_hits_within_capacity_are_accepted() {
        let limiter = RateLimiter::new(3, 15);
        let base = Utc::now();

        assert!(limiter.try_acquire_at(1, at(base, 0)));
        assert!(limiter.try_acquire_at(1, at(base, 1)));
        assert!(limiter.try_acquire_at(1, at(base, 2)));
        assert!(!limiter.try_acquire_at(1, at(base, 3)));
        assert!(!limiter.try_acquire_at(1, at(base, 14)));
    }

    #[test]
    fn test_window_resets_after_elapsing() {
        let limiter = RateLimiter::new(2, 10);
        let base = Utc::now();

        assert!(limiter.try_acquire_at(5, at(base, 0)));
        assert!(limiter.try_acquire_at(5, at(base, 1)));
        assert!(!limiter.try_acquire_at(5, at(base, 9)));

        // Ten seconds after the first hit the window is gone
        assert!(limiter.try_acquire_at(5, at(base, 10)));
        assert!(limiter.try_acquire_at(5, at(base, 11)));
        assert!(!limiter.try_acquire_at(5, at(base, 12)));
    }

    #[test]
    fn test_rejected_hits_do_not_extend_the_window() {
        let limiter = RateLimiter::new(2, 10);
        let base = Utc::now();

        assert!(limiter.try_acquire_at(9, at(base, 0)));
        assert!(limiter.try_acquire_at(9, at(base, 1)));
        // Hammering while exhausted must not push the reset point out
        assert!(!limiter.try_acquire_at(9, at(base, 5)));
        assert!(!limiter.try_acquire_at(9, at(base, 9)));
        assert!(limiter.try_acquire_at(9, at(base, 10)));
    }

    #[test]
    fn test_boundary_burst_reaches_double_capacity() {
        let limiter = RateLimiter::new(2, 10);
        let base = Utc::now();

        // Two hits at the end of one window, two at the start of the next
        assert!(limiter.try_acquire_at(3, at(base, 8)));
        assert!(limiter.try_acquire_at(3, at(base, 9)));
        assert!(limiter.try_acquire_at(3, at(base, 18)));
        assert!(limiter.try_acquire_at(3, at(base, 19)));
        assert!(!limiter.try_acquire_at(3, at(base, 20)));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, 10);
        let base = Utc::now();

        assert!(limiter.try_acquire_at(1, at(base, 0)));
        assert!(!limiter.try_acquire_at(1, at(base, 1)));
        assert!(limiter.try_acquire_at(2, at(base, 1)));
    }

    #[test]
    fn test_reset_clears_a_key() {
        let limiter = RateLimiter::new(1, 10);
        let base = Utc::now();

        assert!(limiter.try_acquire_at(7, at(base, 0)));
        assert!(!limiter.try_acquire_at(7, at(base, 1)));
        limiter.reset(7);
        assert!(limiter.try_acquire_at(7, at(base, 2)));
    }
}
