//! Songline - Community Infrastructure Coordination Layer
//!
//! Coordination services for community platforms: a multi-tier cache and a
//! priority job queue, both aware of data sovereignty and cultural
//! priorities.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Cache Coordinator                       │
//! │  Tier1 (hot) → Tier2 (warm) → Distributed → Fallback (db)   │
//! │        sovereignty validation gates sensitive writes        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     Queue Coordinator                       │
//! │  admission → priority boosts → dispatch → retry → DLQ       │
//! │   schedules: cron / ceremony / moon phase / seasonal        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Multi-tier cache with circuit-broken distributed tier
//! - [`queue`] - Priority job queues with cultural boosts and schedules
//! - [`error`] - Error types

pub mod cache;
pub mod error;
pub mod queue;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheCoordinator, CacheOptions, SovereigntyContext};
pub use error::{Error, Result};
pub use queue::{JobId, JobOptions, JobOutcome, JobState, QueueConfig, QueueCoordinator};
