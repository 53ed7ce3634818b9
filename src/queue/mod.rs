//! Priority Job Queues
//!
//! Job admission, priority resolution with cultural boosts, rate-limited
//! intake, worker dispatch, retry with exponential backoff, dead letter
//! reprocessing, and recurring schedules (cron, ceremony calendar, moon
//! phase, seasonal markers).

pub mod coordinator;
pub mod job;
pub mod metrics;
pub mod priority;
pub mod rate;
pub mod registry;
pub mod schedule;
pub mod store;

pub use coordinator::{JobHandler, LogNotifier, Notifier, QueueConfig, QueueCoordinator};
pub use job::{DeadLetterJob, Job, JobId, JobOptions, JobOutcome, JobState, MAX_PRIORITY};
pub use metrics::{QueueMetrics, QueueMetricsSnapshot};
pub use priority::PriorityCalculator;
pub use rate::RateLimiter;
pub use registry::{RegistryConfig, WorkerInfo, WorkerRegistry};
pub use schedule::{
    CeremonyCalendar, DueJob, MoonPhase, ScheduleEntry, ScheduleKind, Scheduler, SeasonMarker,
};
pub use store::{InMemoryJobStore, JobStore};
