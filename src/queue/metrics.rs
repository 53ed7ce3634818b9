//! Queue Metrics
//!
//! Lock-free counters for the queue coordinator, mirrored into the
//! monitoring endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Coordinator-wide counters
#[derive(Debug, Default)]
pub struct QueueMetrics {
    admitted: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    cancelled: AtomicU64,
    dlq_reprocessed: AtomicU64,
    failure_notifications: AtomicU64,
    workers_reaped: AtomicU64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dlq_reprocessed(&self) {
        self.dlq_reprocessed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure_notification(&self) {
        self.failure_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_reaped(&self) {
        self.workers_reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    pub fn failure_notifications(&self) -> u64 {
        self.failure_notifications.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            dlq_reprocessed: self.dlq_reprocessed.load(Ordering::Relaxed),
            failure_notifications: self.failure_notifications.load(Ordering::Relaxed),
            workers_reaped: self.workers_reaped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize)]
pub struct QueueMetricsSnapshot {
    pub admitted: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub cancelled: u64,
    pub dlq_reprocessed: u64,
    pub failure_notifications: u64,
    pub workers_reaped: u64,
}
