//! Worker Registry
//!
//! Tracks registered workers and their heartbeats. Workers that stop
//! heartbeating past the stall threshold are reaped; the coordinator then
//! releases their in-flight jobs back to pending.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::{Error, Result};

/// Default heartbeat interval workers are expected to honor
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// Missed-heartbeat budget before a worker is considered stalled
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(30);

/// A registered worker
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub id: String,
    /// Queues the worker pulls from
    pub queues: HashSet<String>,
    /// Jobs the worker may process concurrently
    pub concurrency: usize,
    /// Jobs currently held
    pub active_jobs: usize,
    pub registered_at: Instant,
    pub last_heartbeat: Instant,
}

impl WorkerInfo {
    /// Whether the worker has capacity for another job
    pub fn has_capacity(&self) -> bool {
        self.active_jobs < self.concurrency
    }
}

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub heartbeat_interval: Duration,
    pub stall_threshold: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
        }
    }
}

/// Concurrent worker registry
pub struct WorkerRegistry {
    workers: DashMap<String, WorkerInfo>,
    config: RegistryConfig,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            workers: DashMap::new(),
            config,
        }
    }

    /// Register a worker for one or more queues
    pub fn register<I, S>(&self, id: impl Into<String>, queues: I, concurrency: usize)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        let queues: HashSet<String> = queues.into_iter().map(Into::into).collect();
        let now = Instant::now();
        tracing::info!(worker = %id, queues = queues.len(), "worker registered");
        self.workers.insert(
            id.clone(),
            WorkerInfo {
                id,
                queues,
                concurrency: concurrency.max(1),
                active_jobs: 0,
                registered_at: now,
                last_heartbeat: now,
            },
        );
    }

    /// Remove a worker
    pub fn deregister(&self, id: &str) -> bool {
        self.workers.remove(id).is_some()
    }

    /// Record a heartbeat from a worker
    pub fn heartbeat(&self, id: &str) -> Result<()> {
        let mut worker = self
            .workers
            .get_mut(id)
            .ok_or_else(|| Error::WorkerNotFound(id.to_string()))?;
        worker.last_heartbeat = Instant::now();
        Ok(())
    }

    /// Account for a job claimed by a worker
    pub fn job_claimed(&self, id: &str) {
        if let Some(mut worker) = self.workers.get_mut(id) {
            worker.active_jobs += 1;
        }
    }

    /// Account for a job completed, failed, or released by a worker
    pub fn job_released(&self, id: &str) {
        if let Some(mut worker) = self.workers.get_mut(id) {
            worker.active_jobs = worker.active_jobs.saturating_sub(1);
        }
    }

    /// Active workers with spare capacity on a queue
    pub fn available_for(&self, queue: &str) -> Vec<WorkerInfo> {
        self.workers
            .iter()
            .filter(|w| w.queues.contains(queue) && w.has_capacity())
            .map(|w| w.clone())
            .collect()
    }

    /// Remove workers whose last heartbeat is past the stall threshold,
    /// returning their ids so the caller can release their jobs
    pub fn reap_stalled(&self) -> Vec<String> {
        let now = Instant::now();
        let threshold = self.config.stall_threshold;
        let stalled: Vec<String> = self
            .workers
            .iter()
            .filter(|w| now.duration_since(w.last_heartbeat) > threshold)
            .map(|w| w.id.clone())
            .collect();

        for id in &stalled {
            tracing::warn!(worker = %id, "worker stalled, reaping");
            self.workers.remove(id);
        }
        stalled
    }

    /// Look up a worker
    pub fn get(&self, id: &str) -> Option<WorkerInfo> {
        self.workers.get(id).map(|w| w.clone())
    }

    /// Number of registered workers
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Expected heartbeat interval, for workers to pace themselves
    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval
    }
}

impl Default for WorkerRegistry {
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

    #[test]
    fn test_register_and_heartbeat() {
        let registry = WorkerRegistry::new();
        registry.register("w1", ["q"], 4);
        assert_eq!(registry.len(), 1);
        assert!(registry.heartbeat("w1").is_ok());
        assert!(registry.heartbeat("ghost").is_err());
    }

    #[test]
    fn test_capacity_tracking() {
        let registry = WorkerRegistry::new();
        registry.register("w1", ["q"], 2);

        registry.job_claimed("w1");
        registry.job_claimed("w1");
        assert!(!registry.get("w1").unwrap().has_capacity());

        registry.job_released("w1");
        assert!(registry.get("w1").unwrap().has_capacity());
    }

    #[test]
    fn test_available_for_filters_queue_and_capacity() {
        let registry = WorkerRegistry::new();
        registry.register("w1", ["a"], 1);
        registry.register("w2", ["b"], 1);
        registry.job_claimed("w1");

        assert!(registry.available_for("a").is_empty());
        assert_eq!(registry.available_for("b").len(), 1);
    }

    #[test]
    fn test_worker_serves_multiple_queues() {
        let registry = WorkerRegistry::new();
        registry.register("w1", ["imports", "exports"], 2);

        assert_eq!(registry.available_for("imports").len(), 1);
        assert_eq!(registry.available_for("exports").len(), 1);
        assert!(registry.available_for("other").is_empty());

        // Capacity is shared across the worker's queues
        registry.job_claimed("w1");
        registry.job_claimed("w1");
        assert!(registry.available_for("imports").is_empty());
        assert!(registry.available_for("exports").is_empty());
    }

    #[test]
    fn test_reap_stalled() {
        let registry = WorkerRegistry::with_config(RegistryConfig {
            heartbeat_interval: Duration::from_millis(1),
            stall_threshold: Duration::ZERO,
        });
        registry.register("w1", ["q"], 1);
        std::thread::sleep(Duration::from_millis(5));

        let reaped = registry.reap_stalled();
        assert_eq!(reaped, vec!["w1".to_string()]);
        assert!(registry.is_empty());
    }
}
