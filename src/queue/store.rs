//! Job Store
//!
//! Persistence seam for jobs and the dead letter queue. Claiming is the
//! critical operation: it must atomically pick the highest-priority
//! eligible job and mark it processing so two workers never hold the same
//! job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::job::{DeadLetterJob, Job, JobId, JobState};
use crate::error::{Error, Result};

/// Storage backend for jobs and dead letters
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a newly admitted job, assigning its admission sequence
    async fn add(&self, job: Job) -> Result<Job>;

    /// Fetch a job by id
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Persist an updated job
    async fn update(&self, job: Job) -> Result<()>;

    /// Atomically claim the best eligible pending job on a queue for a
    /// worker. Eligible means pending, past its availability time, with
    /// every dependency completed. Order: priority descending, admission
    /// sequence ascending. The claim consumes an attempt.
    async fn claim(&self, queue: &str, worker_id: &str) -> Result<Option<Job>>;

    /// Release every processing job held by a worker back to pending
    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u64>;

    /// Job counts per state for a queue
    async fn counts_by_state(&self, queue: &str) -> Result<HashMap<JobState, u64>>;

    /// Park a job in the dead letter queue
    async fn insert_dead_letter(&self, dead: DeadLetterJob) -> Result<()>;

    /// Fetch up to `limit` retryable dead letters for a queue, oldest first
    async fn retryable_dead_letters(&self, queue: &str, limit: usize)
        -> Result<Vec<DeadLetterJob>>;

    /// Mark a dead letter as reprocessed; it stops being retryable
    async fn mark_dead_letter_retried(&self, id: JobId) -> Result<()>;

    /// Fetch a dead letter row by job id
    async fn get_dead_letter(&self, id: JobId) -> Result<Option<DeadLetterJob>>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// In-memory job store, used in tests and single-process deployments
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    dead_letters: RwLock<HashMap<JobId, DeadLetterJob>>,
    admission_seq: AtomicU64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            dead_letters: RwLock::new(HashMap::new()),
            admission_seq: AtomicU64::new(1),
        }
    }

    fn dependencies_met(jobs: &HashMap<JobId, Job>, job: &Job) -> bool {
        job.depends_on.iter().all(|dep| {
            jobs.get(dep)
                .map(|d| d.state == JobState::Completed)
                .unwrap_or(false)
        })
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn add(&self, mut job: Job) -> Result<Job> {
        job.admitted_seq = self.admission_seq.fetch_add(1, Ordering::SeqCst);
        self.jobs.write().insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    async fn update(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write();
        if !jobs.contains_key(&job.id) {
            return Err(Error::JobNotFound(job.id.to_string()));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn claim(&self, queue: &str, worker_id: &str) -> Result<Option<Job>> {
        let mut jobs = self.jobs.write();
        let now = Utc::now();

        let best = jobs
            .values()
            .filter(|j| {
                j.queue == queue
                    && j.state == JobState::Pending
                    && j.available_at <= now
                    && Self::dependencies_met(&jobs, j)
            })
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.admitted_seq.cmp(&a.admitted_seq))
            })
            .map(|j| j.id);

        let Some(id) = best else {
            return Ok(None);
        };

        match jobs.get_mut(&id) {
            Some(job) => {
                job.state = JobState::Processing;
                job.worker_id = Some(worker_id.to_string());
                job.attempts += 1;
                job.updated_at = now;
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }

    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u64> {
        let mut jobs = self.jobs.write();
        let now = Utc::now();
        let mut released = 0;
        for job in jobs.values_mut() {
            if job.state == JobState::Processing && job.worker_id.as_deref() == Some(worker_id) {
                job.state = JobState::Pending;
                job.worker_id = None;
                job.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn counts_by_state(&self, queue: &str) -> Result<HashMap<JobState, u64>> {
        let jobs = self.jobs.read();
        let mut counts = HashMap::new();
        for job in jobs.values().filter(|j| j.queue == queue) {
            *counts.entry(job.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn insert_dead_letter(&self, dead: DeadLetterJob) -> Result<()> {
        self.dead_letters.write().insert(dead.job.id, dead);
        Ok(())
    }

    async fn retryable_dead_letters(
        &self,
        queue: &str,
        limit: usize,
    ) -> Result<Vec<DeadLetterJob>> {
        let dead = self.dead_letters.read();
        let mut rows: Vec<DeadLetterJob> = dead
            .values()
            .filter(|d| d.job.queue == queue && d.can_retry && d.retried_at.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|d| d.parked_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn mark_dead_letter_retried(&self, id: JobId) -> Result<()> {
        let mut dead = self.dead_letters.write();
        let row = dead
            .get_mut(&id)
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
        row.retried_at = Some(Utc::now());
        row.can_retry = false;
        Ok(())
    }

    async fn get_dead_letter(&self, id: JobId) -> Result<Option<DeadLetterJob>> {
        Ok(self.dead_letters.read().get(&id).cloned())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job::JobOptions;
    use serde_json::json;

    fn job(queue: &str, priority: u8) -> Job {
        Job::new(queue, "test", json!({}), priority, 3, &JobOptions::default())
    }

    #[tokio::test]
    async fn test_claim_highest_priority_first() {
        let store = InMemoryJobStore::new();
        store.add(job("q", 3)).await.unwrap();
        let high = store.add(job("q", 9)).await.unwrap();
        store.add(job("q", 5)).await.unwrap();

        let claimed = store.claim("q", "w1").await.unwrap().unwrap();
        assert_eq!(claimed.id, high.id);
        assert_eq!(claimed.state, JobState::Processing);
        assert_eq!(claimed.attempts, 1);
    }

    #[tokio::test]
    async fn test_claim_fifo_within_priority() {
        let store = InMemoryJobStore::new();
        let first = store.add(job("q", 5)).await.unwrap();
        store.add(job("q", 5)).await.unwrap();

        let claimed = store.claim("q", "w1").await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
    }

    #[tokio::test]
    async fn test_claim_skips_other_queues() {
        let store = InMemoryJobStore::new();
        store.add(job("other", 9)).await.unwrap();
        assert!(store.claim("q", "w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_respects_delay() {
        let store = InMemoryJobStore::new();
        let options = JobOptions {
            delay_ms: 60_000,
            ..Default::default()
        };
        store
            .add(Job::new("q", "t", json!({}), 5, 3, &options))
            .await
            .unwrap();

        assert!(store.claim("q", "w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_waits_for_dependencies() {
        let store = InMemoryJobStore::new();
        let dep = store.add(job("q", 5)).await.unwrap();
        let options = JobOptions {
            depends_on: vec![dep.id],
            ..Default::default()
        };
        let dependent = store
            .add(Job::new("q", "t", json!({}), 9, 3, &options))
            .await
            .unwrap();

        // Dependency claims first despite lower priority
        let claimed = store.claim("q", "w1").await.unwrap().unwrap();
        assert_eq!(claimed.id, dep.id);

        // Dependent stays blocked until the dependency completes
        assert!(store.claim("q", "w2").await.unwrap().is_none());

        let mut done = claimed;
        done.state = JobState::Completed;
        store.update(done).await.unwrap();

        let claimed = store.claim("q", "w2").await.unwrap().unwrap();
        assert_eq!(claimed.id, dependent.id);
    }

    #[tokio::test]
    async fn test_no_double_claim() {
        let store = InMemoryJobStore::new();
        store.add(job("q", 5)).await.unwrap();

        assert!(store.claim("q", "w1").await.unwrap().is_some());
        assert!(store.claim("q", "w2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_worker_jobs() {
        let store = InMemoryJobStore::new();
        store.add(job("q", 5)).await.unwrap();
        let claimed = store.claim("q", "w1").await.unwrap().unwrap();

        let released = store.release_worker_jobs("w1").await.unwrap();
        assert_eq!(released, 1);

        let back = store.get(claimed.id).await.unwrap().unwrap();
        assert_eq!(back.state, JobState::Pending);
        assert!(back.worker_id.is_none());
    }

    #[tokio::test]
    async fn test_dead_letter_roundtrip() {
        let store = InMemoryJobStore::new();
        let j = store.add(job("q", 5)).await.unwrap();
        store
            .insert_dead_letter(DeadLetterJob {
                job: j.clone(),
                failure_reason: "boom".to_string(),
                failure_count: 3,
                can_retry: true,
                retried_at: None,
                parked_at: Utc::now(),
            })
            .await
            .unwrap();

        let rows = store.retryable_dead_letters("q", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(store
            .retryable_dead_letters("other", 10)
            .await
            .unwrap()
            .is_empty());

        store.mark_dead_letter_retried(j.id).await.unwrap();
        assert!(store.retryable_dead_letters("q", 10).await.unwrap().is_empty());

        let row = store.get_dead_letter(j.id).await.unwrap().unwrap();
        assert!(row.retried_at.is_some());
        assert!(!row.can_retry);
    }
}
