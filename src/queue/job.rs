//! Job Model
//!
//! Core job types shared across the queue coordinator, the store, and the
//! scheduler. A job carries a payload, a resolved priority, retry state,
//! and the cultural flags that drive priority boosts and failure
//! notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum resolved job priority
pub const MAX_PRIORITY: u8 = 10;

/// Unique job identifier
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Admitted, waiting for dispatch
    Pending,
    /// Claimed by a worker
    Processing,
    /// Finished successfully
    Completed,
    /// Failed, awaiting retry
    Failed,
    /// Retries exhausted or fatally failed
    DeadLetter,
    /// Cancelled before completion
    Cancelled,
}

impl JobState {
    /// Terminal states accept no further transitions except dead-letter
    /// reprocessing
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::DeadLetter | JobState::Cancelled
        )
    }

    /// Whether `self -> next` is a legal lifecycle transition
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Failed, Pending)
                | (Failed, Processing)
                | (Failed, DeadLetter)
                | (Failed, Cancelled)
                | (DeadLetter, Pending)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::DeadLetter => "dead_letter",
            JobState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Per-job submission options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Base priority before boosts, 0..=10
    pub priority: u8,
    /// Delay before the job becomes eligible for dispatch, in milliseconds
    pub delay_ms: u64,
    /// Submitted on behalf of an elder (+3 boost, failure notification)
    pub elder_request: bool,
    /// Tied to a ceremony (+2 boost)
    pub ceremony_related: bool,
    /// Concerns indigenous data (+1.5 boost, failure notification)
    pub indigenous_job: bool,
    /// Jobs that must complete before this one may dispatch
    pub depends_on: Vec<JobId>,
    /// External notification target invoked on completion
    pub on_complete: Option<String>,
    /// External notification target invoked on failure
    pub on_fail: Option<String>,
    /// Retry attempts override; None uses the queue default
    pub retry_attempts: Option<u32>,
}

/// A job as held by the store and handed to workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Queue the job was admitted to
    pub queue: String,
    /// Job type name, routes to a handler
    pub job_type: String,
    /// Opaque payload handed to the handler
    pub payload: serde_json::Value,
    /// Resolved priority after boosts, 0..=10
    pub priority: u8,
    pub state: JobState,
    /// Attempts consumed so far
    pub attempts: u32,
    /// Maximum attempts before dead-lettering
    pub max_attempts: u32,
    /// Monotonic admission sequence, breaks priority ties fairly
    pub admitted_seq: u64,
    /// Earliest time the job may dispatch
    pub available_at: DateTime<Utc>,
    pub depends_on: Vec<JobId>,
    pub elder_request: bool,
    pub ceremony_related: bool,
    pub indigenous_job: bool,
    /// Notification target invoked on completion
    pub on_complete: Option<String>,
    /// Notification target invoked on failure
    pub on_fail: Option<String>,
    /// Worker currently processing the job, if any
    pub worker_id: Option<String>,
    /// Value the handler reported on completion
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Most recent failure message
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        queue: impl Into<String>,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        priority: u8,
        max_attempts: u32,
        options: &JobOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            queue: queue.into(),
            job_type: job_type.into(),
            payload,
            priority: priority.min(MAX_PRIORITY),
            state: JobState::Pending,
            attempts: 0,
            max_attempts,
            admitted_seq: 0,
            available_at: now + chrono::Duration::milliseconds(options.delay_ms as i64),
            depends_on: options.depends_on.clone(),
            elder_request: options.elder_request,
            ceremony_related: options.ceremony_related,
            indigenous_job: options.indigenous_job,
            on_complete: options.on_complete.clone(),
            on_fail: options.on_fail.clone(),
            worker_id: None,
            result: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the job still has retry budget left
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Jobs needing a failure notification (elder or indigenous)
    pub fn needs_failure_notification(&self) -> bool {
        self.elder_request || self.indigenous_job
    }
}

/// What a handler reports back after processing a job
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// Processed successfully, optionally carrying a result value that is
    /// stored on the job
    Success(Option<serde_json::Value>),
    /// Failed but worth retrying
    RetryableFailure(String),
    /// Failed in a way retrying cannot fix; dead-letters immediately
    FatalFailure(String),
}

/// A job parked in the dead letter queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterJob {
    pub job: Job,
    /// Why the job was dead-lettered
    pub failure_reason: String,
    /// Total failures accumulated before parking
    pub failure_count: u32,
    /// Eligible for reprocessing
    pub can_retry: bool,
    /// Set when reprocessing re-admitted the job
    pub retried_at: Option<DateTime<Utc>>,
    pub parked_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
