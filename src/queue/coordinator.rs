//! Queue Coordinator
//!
//! Admission, dispatch, retry, and dead-letter handling for priority job
//! queues. Admission resolves priorities and validates dependencies;
//! dispatch claims the best eligible job for each worker with capacity;
//! failures back off exponentially until the attempt budget runs out and
//! the job parks in the dead letter queue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::job::{DeadLetterJob, Job, JobId, JobOptions, JobOutcome, JobState};
use super::metrics::{QueueMetrics, QueueMetricsSnapshot};
use super::priority::PriorityCalculator;
use super::rate::RateLimiter;
use super::registry::WorkerRegistry;
use super::schedule::Scheduler;
use super::store::JobStore;
use crate::error::{Error, Result};

/// Dead letters reprocessed per batch
const DLQ_BATCH_SIZE: usize = 100;
/// Priority bump applied to reprocessed dead letters
const DLQ_RETRY_BOOST: u8 = 2;

/// Per-queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Jobs the queue may have processing at once
    pub concurrency: usize,
    /// Admissions per minute; 0 = unlimited
    pub rate_limit_per_minute: u32,
    /// Default attempt budget for jobs on this queue
    pub retry_attempts: u32,
    /// Base backoff in milliseconds; doubles per attempt
    pub retry_backoff_base_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            rate_limit_per_minute: 0,
            retry_attempts: 3,
            retry_backoff_base_ms: 1_000,
        }
    }
}

/// Processes jobs of a given type
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> JobOutcome;
}

/// Delivers job notifications: per-job callback targets, and the
/// stakeholder hook for failed elder and indigenous jobs
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Stakeholder notification for a failed elder or indigenous job
    async fn stakeholder_failure(&self, job: &Job, reason: &str);

    /// Invoke a job's completion callback target
    async fn job_completed(&self, job: &Job, target: &str);

    /// Invoke a job's failure callback target
    async fn job_failed(&self, job: &Job, target: &str, reason: &str);
}

/// Default notifier, records every notification in the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn stakeholder_failure(&self, job: &Job, reason: &str) {
        tracing::error!(
            job_id = %job.id,
            queue = %job.queue,
            elder = job.elder_request,
            indigenous = job.indigenous_job,
            reason,
            "priority job failed, community notification required"
        );
    }

    async fn job_completed(&self, job: &Job, target: &str) {
        tracing::info!(job_id = %job.id, target, "completion callback");
    }

    async fn job_failed(&self, job: &Job, target: &str, reason: &str) {
        tracing::warn!(job_id = %job.id, target, reason, "failure callback");
    }
}

/// Priority queue coordinator
pub struct QueueCoordinator {
    queues: DashMap<String, QueueConfig>,
    handlers: DashMap<String, Arc<dyn JobHandler>>,
    store: Arc<dyn JobStore>,
    registry: Arc<WorkerRegistry>,
    scheduler: Arc<Scheduler>,
    limiter: RateLimiter,
    priority: PriorityCalculator,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<QueueMetrics>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl QueueCoordinator {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self::with_parts(
            store,
            Arc::new(WorkerRegistry::new()),
            Arc::new(Scheduler::new()),
            Arc::new(LogNotifier),
        )
    }

    pub fn with_parts(
        store: Arc<dyn JobStore>,
        registry: Arc<WorkerRegistry>,
        scheduler: Arc<Scheduler>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            queues: DashMap::new(),
            handlers: DashMap::new(),
            store,
            registry,
            scheduler,
            limiter: RateLimiter::new(),
            priority: PriorityCalculator::new(),
            notifier,
            metrics: Arc::new(QueueMetrics::new()),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Declare a queue. Jobs can only be admitted to declared queues.
    pub fn register_queue(&self, name: impl Into<String>, config: QueueConfig) {
        self.queues.insert(name.into(), config);
    }

    /// Route a job type to a handler
    pub fn register_handler(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    /// Worker registry handle
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Scheduler handle
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Metrics snapshot
    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Job counts per state for a queue (monitoring surface)
    pub async fn queue_depth(&self, queue: &str) -> Result<HashMap<JobState, u64>> {
        if !self.queues.contains_key(queue) {
            return Err(Error::QueueNotFound(queue.to_string()));
        }
        self.store.counts_by_state(queue).await
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Admit a job. Resolves the effective priority from the submission
    /// options, validates dependencies, and applies the queue's admission
    /// rate limit (delaying, never rejecting, over-limit callers).
    pub async fn add_job(
        &self,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobId> {
        let config = self
            .queues
            .get(queue)
            .map(|c| c.clone())
            .ok_or_else(|| Error::QueueNotFound(queue.to_string()))?;

        self.validate_dependencies(&options.depends_on).await?;
        self.limiter
            .acquire(queue, config.rate_limit_per_minute)
            .await;

        let priority = self.priority.resolve(&options);
        let max_attempts = options.retry_attempts.unwrap_or(config.retry_attempts);
        let job = Job::new(queue, job_type, payload, priority, max_attempts, &options);
        let job = self.store.add(job).await?;

        self.metrics.record_admitted();
        tracing::debug!(job_id = %job.id, queue, priority, "job admitted");
        Ok(job.id)
    }

    /// Dependencies must exist and their transitive graph must be acyclic
    async fn validate_dependencies(&self, deps: &[JobId]) -> Result<()> {
        for dep in deps {
            if self.store.get(*dep).await?.is_none() {
                return Err(Error::JobNotFound(dep.to_string()));
            }
        }

        // Walk the existing graph; a repeat on the current path is a cycle
        let mut visited = HashSet::new();
        let mut stack: Vec<(JobId, usize)> = deps.iter().map(|d| (*d, 0)).collect();
        let mut path: Vec<JobId> = Vec::new();
        while let Some((id, depth)) = stack.pop() {
            path.truncate(depth);
            if path.contains(&id) {
                return Err(Error::DependencyCycle {
                    job_id: id.to_string(),
                });
            }
            if !visited.insert(id) {
                continue;
            }
            path.push(id);
            if let Some(job) = self.store.get(id).await? {
                for dep in job.depends_on {
                    stack.push((dep, depth + 1));
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// One dispatch pass over a queue: claim jobs for every worker with
    /// capacity, up to the queue's concurrency, and process the claimed
    /// batch concurrently. Returns the number of jobs processed.
    pub async fn dispatch_queue(&self, queue: &str) -> Result<usize> {
        let config = self
            .queues
            .get(queue)
            .map(|c| c.clone())
            .ok_or_else(|| Error::QueueNotFound(queue.to_string()))?;

        let processing = self
            .store
            .counts_by_state(queue)
            .await?
            .get(&JobState::Processing)
            .copied()
            .unwrap_or(0) as usize;
        let slots = config.concurrency.saturating_sub(processing);
        if slots == 0 {
            return Ok(0);
        }

        let mut claimed = Vec::new();
        'claiming: while claimed.len() < slots {
            let workers = self.registry.available_for(queue);
            if workers.is_empty() {
                break;
            }
            let mut progressed = false;
            for worker in workers {
                if claimed.len() >= slots {
                    break 'claiming;
                }
                if let Some(job) = self.store.claim(queue, &worker.id).await? {
                    self.registry.job_claimed(&worker.id);
                    self.metrics.record_dispatched();
                    claimed.push(job);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        let count = claimed.len();
        join_all(claimed.into_iter().map(|job| self.process(job, &config))).await;
        Ok(count)
    }

    async fn process(&self, job: Job, config: &QueueConfig) {
        let outcome = match self.handlers.get(&job.job_type).map(|h| h.clone()) {
            Some(handler) => handler.handle(&job).await,
            None => JobOutcome::FatalFailure(format!("no handler for job type {}", job.job_type)),
        };

        if let Some(worker) = &job.worker_id {
            self.registry.job_released(worker);
        }
        if let Err(e) = self.handle_outcome(job, outcome, config).await {
            tracing::error!(error = %e, "failed to record job outcome");
        }
    }

    async fn handle_outcome(
        &self,
        mut job: Job,
        outcome: JobOutcome,
        config: &QueueConfig,
    ) -> Result<()> {
        // The row may have moved on while the handler ran (cancelled, or
        // released by the reaper). Only a still-processing row accepts an
        // outcome; anything else drops it.
        match self.store.get(job.id).await? {
            Some(current) if current.state == JobState::Processing => {}
            current => {
                tracing::debug!(
                    job_id = %job.id,
                    state = ?current.map(|j| j.state),
                    "job no longer processing, outcome dropped"
                );
                return Ok(());
            }
        }

        job.worker_id = None;
        job.updated_at = Utc::now();

        match outcome {
            JobOutcome::Success(result) => {
                job.state = JobState::Completed;
                job.result = result;
                self.metrics.record_completed();
                tracing::debug!(job_id = %job.id, "job completed");
                if let Some(target) = job.on_complete.clone() {
                    self.notifier.job_completed(&job, &target).await;
                }
                self.store.update(job).await
            }
            JobOutcome::RetryableFailure(reason) => {
                job.state = JobState::Failed;
                job.last_error = Some(reason.clone());
                self.store.update(job.clone()).await?;
                if job.has_attempts_left() {
                    // Exponential backoff: base * 2^attempts
                    let backoff_ms = config.retry_backoff_base_ms << job.attempts.min(16);
                    job.state = JobState::Pending;
                    job.available_at =
                        Utc::now() + chrono::Duration::milliseconds(backoff_ms as i64);
                    self.metrics.record_retried();
                    tracing::debug!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        backoff_ms,
                        "job failed, retrying"
                    );
                    self.store.update(job).await
                } else {
                    self.dead_letter(job, reason).await
                }
            }
            JobOutcome::FatalFailure(reason) => {
                job.state = JobState::Failed;
                job.last_error = Some(reason.clone());
                self.store.update(job.clone()).await?;
                self.dead_letter(job, reason).await
            }
        }
    }

    async fn dead_letter(&self, mut job: Job, reason: String) -> Result<()> {
        job.state = JobState::DeadLetter;
        job.last_error = Some(reason.clone());
        self.store.update(job.clone()).await?;
        self.store
            .insert_dead_letter(DeadLetterJob {
                failure_reason: reason.clone(),
                failure_count: job.attempts,
                can_retry: true,
                retried_at: None,
                parked_at: Utc::now(),
                job: job.clone(),
            })
            .await?;

        self.metrics.record_dead_lettered();
        tracing::warn!(job_id = %job.id, queue = %job.queue, reason = %reason, "job dead-lettered");

        if let Some(target) = job.on_fail.clone() {
            self.notifier.job_failed(&job, &target, &reason).await;
        }
        if job.needs_failure_notification() {
            self.notifier.stakeholder_failure(&job, &reason).await;
            self.metrics.record_failure_notification();
        }
        Ok(())
    }

    // =========================================================================
    // Lifecycle operations
    // =========================================================================

    /// Current state of a job
    pub async fn get_job_status(&self, id: JobId) -> Result<JobState> {
        Ok(self.get_job(id).await?.state)
    }

    /// Full job row, including the stored result after completion
    pub async fn get_job(&self, id: JobId) -> Result<Job> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    /// Cancel a job that has not finished
    pub async fn cancel_job(&self, id: JobId) -> Result<()> {
        let mut job = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

        if !job.state.can_transition_to(JobState::Cancelled) {
            return Err(Error::InvalidTransition {
                job_id: id.to_string(),
                from: job.state.to_string(),
                to: JobState::Cancelled.to_string(),
            });
        }

        job.state = JobState::Cancelled;
        job.updated_at = Utc::now();
        self.store.update(job).await?;
        self.metrics.record_cancelled();
        Ok(())
    }

    /// Manually re-admit a failed or dead-lettered job. Attempts already
    /// consumed are kept, so the remaining budget shrinks.
    pub async fn retry_job(&self, id: JobId) -> Result<()> {
        let mut job = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

        if !job.state.can_transition_to(JobState::Pending) {
            return Err(Error::InvalidTransition {
                job_id: id.to_string(),
                from: job.state.to_string(),
                to: JobState::Pending.to_string(),
            });
        }

        job.state = JobState::Pending;
        job.available_at = Utc::now();
        job.updated_at = Utc::now();
        self.store.update(job).await?;
        self.metrics.record_retried();
        Ok(())
    }

    /// Reprocess a batch of retryable dead letters on one queue. Each is
    /// re-admitted at its original priority plus a small boost, with a
    /// fresh attempt budget, and its dead-letter row is marked retried. A
    /// row that fails to re-admit keeps its retryable flag for the next
    /// batch.
    pub async fn process_dlq(&self, queue: &str) -> Result<usize> {
        if !self.queues.contains_key(queue) {
            return Err(Error::QueueNotFound(queue.to_string()));
        }
        let batch = self
            .store
            .retryable_dead_letters(queue, DLQ_BATCH_SIZE)
            .await?;
        let mut reprocessed = 0;

        for dead in batch {
            let mut job = dead.job.clone();
            job.state = JobState::Pending;
            job.priority = (job.priority + DLQ_RETRY_BOOST).min(super::job::MAX_PRIORITY);
            job.attempts = 0;
            job.available_at = Utc::now();
            job.updated_at = Utc::now();

            if let Err(e) = self.store.update(job).await {
                tracing::warn!(job_id = %dead.job.id, error = %e, "dead letter re-admission failed");
                continue;
            }
            self.store.mark_dead_letter_retried(dead.job.id).await?;
            self.metrics.record_dlq_reprocessed();
            reprocessed += 1;
        }

        if reprocessed > 0 {
            tracing::info!(queue, reprocessed, "dead letter batch reprocessed");
        }
        Ok(reprocessed)
    }

    // =========================================================================
    // Background loops
    // =========================================================================

    /// Start the dispatch, schedule-polling, and worker-reaping loops
    pub fn start(self: Arc<Self>) {
        let dispatcher = self.clone();
        self.tasks.spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(100));
            loop {
                tokio::select! {
                    _ = dispatcher.shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        let queues: Vec<String> =
                            dispatcher.queues.iter().map(|q| q.key().clone()).collect();
                        for queue in queues {
                            if let Err(e) = dispatcher.dispatch_queue(&queue).await {
                                tracing::error!(queue = %queue, error = %e, "dispatch pass failed");
                            }
                        }
                    }
                }
            }
        });

        let poller = self.clone();
        self.tasks.spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = poller.shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        let due = poller.scheduler.poll_due(Utc::now()).await;
                        for fire in due {
                            if let Err(e) = poller
                                .add_job(&fire.queue, &fire.job_type, fire.payload.clone(), fire.options.clone())
                                .await
                            {
                                tracing::warn!(schedule = %fire.schedule, error = %e, "scheduled admission failed");
                            }
                        }
                    }
                }
            }
        });

        let reaper = self.clone();
        self.tasks.spawn(async move {
            let mut tick = tokio::time::interval(reaper.registry.heartbeat_interval());
            loop {
                tokio::select! {
                    _ = reaper.shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        for worker in reaper.registry.reap_stalled() {
                            reaper.metrics.record_worker_reaped();
                            match reaper.store.release_worker_jobs(&worker).await {
                                Ok(released) if released > 0 => {
                                    tracing::warn!(worker = %worker, released, "released jobs from stalled worker");
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    tracing::error!(worker = %worker, error = %e, "failed to release stalled worker jobs");
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    /// Stop the loops, letting in-flight dispatch passes finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::store::InMemoryJobStore;
    use parking_lot::Mutex;
    use serde_json::json;

    struct RecordingHandler {
        processed: Mutex<Vec<JobId>>,
        outcome: fn(&Job) -> JobOutcome,
    }

    impl RecordingHandler {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                processed: Mutex::new(Vec::new()),
                outcome: |_| JobOutcome::Success(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                processed: Mutex::new(Vec::new()),
                outcome: |_| JobOutcome::RetryableFailure("transient".to_string()),
            })
        }

        fn fatal() -> Arc<Self> {
            Arc::new(Self {
                processed: Mutex::new(Vec::new()),
                outcome: |_| JobOutcome::FatalFailure("unrecoverable".to_string()),
            })
        }
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(&self, job: &Job) -> JobOutcome {
            self.processed.lock().push(job.id);
            (self.outcome)(job)
        }
    }

    fn coordinator() -> Arc<QueueCoordinator> {
        let coord = Arc::new(QueueCoordinator::new(Arc::new(InMemoryJobStore::new())));
        coord.register_queue(
            "work",
            QueueConfig {
                retry_backoff_base_ms: 0,
                ..Default::default()
            },
        );
        coord.registry().register("w1", ["work"], 4);
        coord
    }

    #[tokio::test]
    async fn test_unknown_queue_rejected() {
        let coord = coordinator();
        let err = coord
            .add_job("nope", "t", json!({}), JobOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueueNotFound(_)));
    }

    #[tokio::test]
    async fn test_elder_job_dispatches_first() {
        let coord = coordinator();
        let handler = RecordingHandler::succeeding();
        coord.register_handler("t", handler.clone());

        let ordinary = coord
            .add_job("work", "t", json!({}), JobOptions::default())
            .await
            .unwrap();
        let elder = coord
            .add_job(
                "work",
                "t",
                json!({}),
                JobOptions {
                    elder_request: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // One slot per pass so ordering is observable
        coord.registry().deregister("w1");
        coord.registry().register("w1", ["work"], 1);
        coord.dispatch_queue("work").await.unwrap();
        coord.dispatch_queue("work").await.unwrap();

        let processed = handler.processed.lock().clone();
        assert_eq!(processed, vec![elder, ordinary]);
    }

    #[tokio::test]
    async fn test_success_completes_job() {
        let coord = coordinator();
        coord.register_handler("t", RecordingHandler::succeeding());

        let id = coord
            .add_job("work", "t", json!({}), JobOptions::default())
            .await
            .unwrap();
        coord.dispatch_queue("work").await.unwrap();

        assert_eq!(coord.get_job_status(id).await.unwrap(), JobState::Completed);
        assert_eq!(coord.metrics().completed, 1);
    }

    #[tokio::test]
    async fn test_handler_result_stored_on_completion() {
        struct SummingHandler;

        #[async_trait]
        impl JobHandler for SummingHandler {
            async fn handle(&self, job: &Job) -> JobOutcome {
                let n = job.payload["n"].as_i64().unwrap_or(0);
                JobOutcome::Success(Some(json!({ "doubled": n * 2 })))
            }
        }

        let coord = coordinator();
        coord.register_handler("sum", Arc::new(SummingHandler));

        let id = coord
            .add_job("work", "sum", json!({"n": 21}), JobOptions::default())
            .await
            .unwrap();
        coord.dispatch_queue("work").await.unwrap();

        let job = coord.get_job(id).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.result, Some(json!({"doubled": 42})));
    }

    #[tokio::test]
    async fn test_cancel_during_processing_is_final() {
        struct SlowHandler;

        #[async_trait]
        impl JobHandler for SlowHandler {
            async fn handle(&self, _job: &Job) -> JobOutcome {
                tokio::time::sleep(Duration::from_millis(200)).await;
                JobOutcome::Success(None)
            }
        }

        let coord = coordinator();
        coord.register_handler("slow", Arc::new(SlowHandler));

        let id = coord
            .add_job("work", "slow", json!({}), JobOptions::default())
            .await
            .unwrap();

        let dispatcher = coord.clone();
        let pass = tokio::spawn(async move { dispatcher.dispatch_queue("work").await });

        // Cancel while the handler is still running
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coord.get_job_status(id).await.unwrap(), JobState::Processing);
        coord.cancel_job(id).await.unwrap();

        pass.await.unwrap().unwrap();

        // The handler's success must not overwrite the cancellation
        assert_eq!(coord.get_job_status(id).await.unwrap(), JobState::Cancelled);
        assert_eq!(coord.metrics().completed, 0);
    }

    #[tokio::test]
    async fn test_retries_then_dead_letters() {
        let coord = coordinator();
        let handler = RecordingHandler::failing();
        coord.register_handler("t", handler.clone());

        let id = coord
            .add_job("work", "t", json!({}), JobOptions::default())
            .await
            .unwrap();

        // Default budget is 3 attempts; zero backoff keeps the job eligible
        for _ in 0..3 {
            coord.dispatch_queue("work").await.unwrap();
        }

        assert_eq!(handler.processed.lock().len(), 3);
        assert_eq!(coord.get_job_status(id).await.unwrap(), JobState::DeadLetter);
        assert_eq!(coord.metrics().dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_fatal_failure_skips_retries() {
        let coord = coordinator();
        let handler = RecordingHandler::fatal();
        coord.register_handler("t", handler.clone());

        let id = coord
            .add_job("work", "t", json!({}), JobOptions::default())
            .await
            .unwrap();
        coord.dispatch_queue("work").await.unwrap();

        assert_eq!(handler.processed.lock().len(), 1);
        assert_eq!(coord.get_job_status(id).await.unwrap(), JobState::DeadLetter);
    }

    #[tokio::test]
    async fn test_elder_failure_sends_notification() {
        let coord = coordinator();
        coord.register_handler("t", RecordingHandler::fatal());

        coord
            .add_job(
                "work",
                "t",
                json!({}),
                JobOptions {
                    elder_request: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        coord.dispatch_queue("work").await.unwrap();

        assert_eq!(coord.metrics().failure_notifications, 1);
    }

    #[tokio::test]
    async fn test_process_dlq_readmits_with_boost() {
        let coord = coordinator();
        coord.register_handler("t", RecordingHandler::fatal());

        let id = coord
            .add_job(
                "work",
                "t",
                json!({}),
                JobOptions {
                    priority: 5,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        coord.dispatch_queue("work").await.unwrap();
        assert_eq!(coord.get_job_status(id).await.unwrap(), JobState::DeadLetter);

        let reprocessed = coord.process_dlq("work").await.unwrap();
        assert_eq!(reprocessed, 1);
        assert_eq!(coord.get_job_status(id).await.unwrap(), JobState::Pending);

        let job = coord.store.get(id).await.unwrap().unwrap();
        assert_eq!(job.priority, 7);
        assert_eq!(job.attempts, 0);

        // A second batch finds nothing; the row is spent
        assert_eq!(coord.process_dlq("work").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let coord = coordinator();
        let id = coord
            .add_job("work", "t", json!({}), JobOptions::default())
            .await
            .unwrap();

        coord.cancel_job(id).await.unwrap();
        assert_eq!(coord.get_job_status(id).await.unwrap(), JobState::Cancelled);

        // Terminal, cannot cancel twice
        assert!(matches!(
            coord.cancel_job(id).await.unwrap_err(),
            Error::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn test_manual_retry_keeps_attempts() {
        let coord = coordinator();
        coord.register_handler("t", RecordingHandler::fatal());

        let id = coord
            .add_job("work", "t", json!({}), JobOptions::default())
            .await
            .unwrap();
        coord.dispatch_queue("work").await.unwrap();

        coord.retry_job(id).await.unwrap();
        let job = coord.store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn test_missing_dependency_rejected() {
        let coord = coordinator();
        let err = coord
            .add_job(
                "work",
                "t",
                json!({}),
                JobOptions {
                    depends_on: vec![JobId::new()],
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_dependent_waits_for_dependency() {
        let coord = coordinator();
        let handler = RecordingHandler::succeeding();
        coord.register_handler("t", handler.clone());

        let dep = coord
            .add_job("work", "t", json!({}), JobOptions::default())
            .await
            .unwrap();
        let child = coord
            .add_job(
                "work",
                "t",
                json!({}),
                JobOptions {
                    priority: 9,
                    depends_on: vec![dep],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        coord.dispatch_queue("work").await.unwrap();
        coord.dispatch_queue("work").await.unwrap();

        let processed = handler.processed.lock().clone();
        assert_eq!(processed, vec![dep, child]);
    }

    #[tokio::test]
    async fn test_concurrency_bounds_dispatch() {
        let coord = Arc::new(QueueCoordinator::new(Arc::new(InMemoryJobStore::new())));
        coord.register_queue(
            "work",
            QueueConfig {
                concurrency: 2,
                ..Default::default()
            },
        );
        coord.registry().register("w1", ["work"], 10);
        coord.register_handler("t", RecordingHandler::succeeding());

        for _ in 0..5 {
            coord
                .add_job("work", "t", json!({}), JobOptions::default())
                .await
                .unwrap();
        }

        let processed = coord.dispatch_queue("work").await.unwrap();
        assert_eq!(processed, 2);
    }

    #[tokio::test]
    async fn test_no_handler_dead_letters() {
        let coord = coordinator();
        let id = coord
            .add_job("work", "unrouted", json!({}), JobOptions::default())
            .await
            .unwrap();
        coord.dispatch_queue("work").await.unwrap();
        assert_eq!(coord.get_job_status(id).await.unwrap(), JobState::DeadLetter);
    }

    #[tokio::test]
    async fn test_callbacks_fire_on_completion_and_failure() {
        #[derive(Default)]
        struct RecordingNotifier {
            events: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl Notifier for RecordingNotifier {
            async fn stakeholder_failure(&self, _job: &Job, _reason: &str) {}
            async fn job_completed(&self, _job: &Job, target: &str) {
                self.events.lock().push(format!("completed:{}", target));
            }
            async fn job_failed(&self, _job: &Job, target: &str, _reason: &str) {
                self.events.lock().push(format!("failed:{}", target));
            }
        }

        let notifier = Arc::new(RecordingNotifier::default());
        let coord = Arc::new(QueueCoordinator::with_parts(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(WorkerRegistry::new()),
            Arc::new(Scheduler::new()),
            notifier.clone(),
        ));
        coord.register_queue("work", QueueConfig::default());
        coord.registry().register("w1", ["work"], 4);
        coord.register_handler("ok", RecordingHandler::succeeding());
        coord.register_handler("bad", RecordingHandler::fatal());

        coord
            .add_job(
                "work",
                "ok",
                json!({}),
                JobOptions {
                    on_complete: Some("webhook/done".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        coord
            .add_job(
                "work",
                "bad",
                json!({}),
                JobOptions {
                    on_fail: Some("webhook/alert".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        coord.dispatch_queue("work").await.unwrap();

        let mut events = notifier.events.lock().clone();
        events.sort();
        assert_eq!(
            events,
            vec![
                "completed:webhook/done".to_string(),
                "failed:webhook/alert".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_start_and_shutdown_loops() {
        let coord = coordinator();
        coord.register_handler("t", RecordingHandler::succeeding());

        coord.clone().start();
        let id = coord
            .add_job("work", "t", json!({}), JobOptions::default())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        coord.shutdown().await;

        assert_eq!(coord.get_job_status(id).await.unwrap(), JobState::Completed);
    }
}
