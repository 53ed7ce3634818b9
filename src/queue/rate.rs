//! Admission Rate Limiting
//!
//! Per-queue rate limiter that spaces admissions evenly across the minute
//! instead of bursting. A queue limited to 60 jobs/minute admits one job
//! every second; callers over the limit are delayed, never rejected.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Per-queue admission spacing
pub struct RateLimiter {
    // Next instant each queue may admit
    next_allowed: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            next_allowed: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve an admission slot for `queue`, waiting out the spacing
    /// interval if the previous admission was too recent. A rate limit of
    /// 0 means unlimited.
    pub async fn acquire(&self, queue: &str, rate_limit_per_minute: u32) {
        if rate_limit_per_minute == 0 {
            return;
        }

        let spacing = Duration::from_millis(60_000 / rate_limit_per_minute as u64);
        let wait = {
            let mut slots = self.next_allowed.lock();
            let now = Instant::now();
            let slot = slots.entry(queue.to_string()).or_insert(now);
            if *slot <= now {
                *slot = now + spacing;
                Duration::ZERO
            } else {
                let wait = *slot - now;
                *slot += spacing;
                wait
            }
        };

        if !wait.is_zero() {
            tracing::debug!(queue, wait_ms = wait.as_millis() as u64, "admission delayed by rate limit");
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire("q", 0).await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_first_admission_is_immediate() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        limiter.acquire("q", 60).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_spacing_between_admissions() {
        let limiter = RateLimiter::new();
        // 600/minute = one slot every 100ms
        let start = Instant::now();
        limiter.acquire("q", 600).await;
        limiter.acquire("q", 600).await;
        limiter.acquire("q", 600).await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let limiter = RateLimiter::new();
        limiter.acquire("a", 600).await;
        let start = Instant::now();
        limiter.acquire("b", 600).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
