//! Error types for the Songline coordination layer

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the coordination layer
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value serialization failed
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Cache Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Decoded value failed its integrity check
    #[error("Checksum mismatch for cached value: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    /// Distributed tier operation failed
    #[error("Distributed tier error: {0}")]
    DistributedTier(String),

    /// Persistent metadata store operation failed
    #[error("Metadata store error: {0}")]
    MetadataStore(String),

    /// Circuit breaker is open and no fallback path is configured
    #[error("Circuit breaker open for {operation}, no fallback configured")]
    CircuitOpen { operation: String },

    /// Distributed tier call exceeded the breaker timeout
    #[error("Distributed tier call timed out after {timeout_ms}ms")]
    TierTimeout { timeout_ms: u64 },

    /// Sovereignty precondition not met (blocking, non-retryable)
    #[error("Sovereignty validation failed: {precondition}")]
    SovereigntyViolation { precondition: String },

    /// Cache warmup run failed
    #[error("Cache warmup run {run_id} failed: {reason}")]
    WarmupFailed { run_id: String, reason: String },

    // =========================================================================
    // Queue Errors
    // =========================================================================
    /// Referenced queue is not configured
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// Referenced job does not exist
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Job dependency graph contains a cycle
    #[error("Dependency cycle detected for job admission: {job_id}")]
    DependencyCycle { job_id: String },

    /// Job is in a state that does not permit the requested transition
    #[error("Invalid job transition for {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    /// Schedule definition could not be resolved into occurrences
    #[error("Schedule resolution failed for {name}: {reason}")]
    ScheduleResolution { name: String, reason: String },

    /// Worker is not registered
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),
}
