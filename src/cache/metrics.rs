//! Cache Metrics Collection
//!
//! Per-tier hit/miss counters, latency EMAs, and promotion counts for the
//! monitoring consumer. All counters are atomics so recording never blocks a
//! cache operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Tier 1 (hot in-process)
    tier1_hits: AtomicU64,
    tier1_misses: AtomicU64,

    // Tier 2 (secondary in-process)
    tier2_hits: AtomicU64,
    tier2_misses: AtomicU64,

    // Distributed tier
    distributed_hits: AtomicU64,
    distributed_misses: AtomicU64,
    distributed_errors: AtomicU64,
    distributed_bypassed: AtomicU64,

    // Persistent fallback
    fallback_hits: AtomicU64,
    fallback_misses: AtomicU64,

    // Promotions into faster tiers after a lower-tier hit
    promotions: AtomicU64,

    // Writes blocked by sovereignty validation
    sovereignty_blocks: AtomicU64,

    // Latency EMAs (microseconds)
    read_latency_us: AtomicU64,
    write_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tier1_hit(&self) {
        self.tier1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tier1_miss(&self) {
        self.tier1_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tier2_hit(&self) {
        self.tier2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tier2_miss(&self) {
        self.tier2_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_distributed_hit(&self) {
        self.distributed_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_distributed_miss(&self) {
        self.distributed_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_distributed_error(&self) {
        self.distributed_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_distributed_bypass(&self) {
        self.distributed_bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_hit(&self) {
        self.fallback_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_miss(&self) {
        self.fallback_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sovereignty_block(&self) {
        self.sovereignty_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_latency(&self, duration: Duration) {
        update_latency_ema(&self.read_latency_us, duration);
    }

    pub fn record_write_latency(&self, duration: Duration) {
        update_latency_ema(&self.write_latency_us, duration);
    }

    pub fn tier1_hits(&self) -> u64 {
        self.tier1_hits.load(Ordering::Relaxed)
    }

    pub fn tier1_misses(&self) -> u64 {
        self.tier1_misses.load(Ordering::Relaxed)
    }

    pub fn distributed_hits(&self) -> u64 {
        self.distributed_hits.load(Ordering::Relaxed)
    }

    pub fn sovereignty_blocks(&self) -> u64 {
        self.sovereignty_blocks.load(Ordering::Relaxed)
    }

    /// Overall hit ratio: any-tier hit over terminal misses
    pub fn overall_hit_ratio(&self) -> f64 {
        let hits = self.tier1_hits.load(Ordering::Relaxed)
            + self.tier2_hits.load(Ordering::Relaxed)
            + self.distributed_hits.load(Ordering::Relaxed)
            + self.fallback_hits.load(Ordering::Relaxed);
        let misses = self.fallback_misses.load(Ordering::Relaxed)
            + self.distributed_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Snapshot all counters
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            tier1_hits: self.tier1_hits.load(Ordering::Relaxed),
            tier1_misses: self.tier1_misses.load(Ordering::Relaxed),
            tier2_hits: self.tier2_hits.load(Ordering::Relaxed),
            tier2_misses: self.tier2_misses.load(Ordering::Relaxed),
            distributed_hits: self.distributed_hits.load(Ordering::Relaxed),
            distributed_misses: self.distributed_misses.load(Ordering::Relaxed),
            distributed_errors: self.distributed_errors.load(Ordering::Relaxed),
            distributed_bypassed: self.distributed_bypassed.load(Ordering::Relaxed),
            fallback_hits: self.fallback_hits.load(Ordering::Relaxed),
            fallback_misses: self.fallback_misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            sovereignty_blocks: self.sovereignty_blocks.load(Ordering::Relaxed),
            read_latency: Duration::from_micros(self.read_latency_us.load(Ordering::Relaxed)),
            write_latency: Duration::from_micros(self.write_latency_us.load(Ordering::Relaxed)),
            overall_hit_ratio: self.overall_hit_ratio(),
        }
    }
}

fn update_latency_ema(target: &AtomicU64, duration: Duration) {
    let new_us = duration.as_micros() as u64;
    let alpha = 0.1; // EMA smoothing factor

    loop {
        let current = target.load(Ordering::Relaxed);
        let updated = if current == 0 {
            new_us
        } else {
            ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
        };

        if target
            .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

/// Tracks elapsed time for one operation
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time since start
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone)]
pub struct CacheMetricsSnapshot {
    pub tier1_hits: u64,
    pub tier1_misses: u64,
    pub tier2_hits: u64,
    pub tier2_misses: u64,
    pub distributed_hits: u64,
    pub distributed_misses: u64,
    pub distributed_errors: u64,
    pub distributed_bypassed: u64,
    pub fallback_hits: u64,
    pub fallback_misses: u64,
    pub promotions: u64,
    pub sovereignty_blocks: u64,
    pub read_latency: Duration,
    pub write_latency: Duration,
    pub overall_hit_ratio: f64,
}

// =============================================================================
// Tests
// =============================================================================
