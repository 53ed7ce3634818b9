//! Circuit Breaker
//!
//! Guards distributed-tier calls with a per-call timeout and an error-rate
//! threshold over a rolling window. While open, callers are routed to their
//! fallback path without touching the distributed tier; after the reset
//! timeout, a single trial call decides whether the breaker closes again.
//!
//! State is process-wide: one tripped breaker affects every concurrent caller
//! in the process.

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through
    Closed,
    /// Calls are bypassed
    Open,
    /// One trial call is allowed through
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Per-call timeout
    pub call_timeout: Duration,
    /// Error rate (0.0 - 1.0) that trips the breaker
    pub failure_rate_threshold: f64,
    /// Rolling window over which the error rate is computed
    pub window: Duration,
    /// Minimum calls in the window before the rate is meaningful
    pub min_calls: usize,
    /// How long the breaker stays open before allowing a trial call
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(2),
            failure_rate_threshold: 0.5,
            window: Duration::from_secs(30),
            min_calls: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    /// (when, succeeded) samples within the rolling window
    samples: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Outcome of asking the breaker for permission to call
enum Permit {
    Allowed { trial: bool },
    Rejected,
}

/// Process-wide circuit breaker
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker with default configuration
    pub fn new() -> Self {
        Self::with_config(BreakerConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                samples: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Current state
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Wrap a distributed-tier call. Returns `CircuitOpen` without invoking
    /// the future when the breaker rejects the call.
    pub async fn call<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let (trial, timeout) = match self.acquire() {
            Permit::Allowed { trial } => (trial, self.config.call_timeout),
            Permit::Rejected => {
                return Err(Error::CircuitOpen {
                    operation: operation.to_string(),
                })
            }
        };

        let outcome = tokio::time::timeout(timeout, fut).await;

        match outcome {
            Ok(Ok(value)) => {
                self.record(true, trial);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record(false, trial);
                Err(e)
            }
            Err(_) => {
                self.record(false, trial);
                Err(Error::TierTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    fn acquire(&self) -> Permit {
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => Permit::Allowed { trial: false },
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!("circuit breaker half-open, allowing trial call");
                    Permit::Allowed { trial: true }
                } else {
                    Permit::Rejected
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Permit::Rejected
                } else {
                    inner.trial_in_flight = true;
                    Permit::Allowed { trial: true }
                }
            }
        }
    }

    fn record(&self, success: bool, trial: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if trial {
            inner.trial_in_flight = false;
            if success {
                inner.state = BreakerState::Closed;
                inner.opened_at = None;
                inner.samples.clear();
                tracing::info!("circuit breaker closed after successful trial");
            } else {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                tracing::warn!("circuit breaker trial failed, reopening");
            }
            return;
        }

        inner.samples.push_back((now, success));
        let window = self.config.window;
        while inner
            .samples
            .front()
            .is_some_and(|(t, _)| now.duration_since(*t) > window)
        {
            inner.samples.pop_front();
        }

        if inner.state == BreakerState::Closed && inner.samples.len() >= self.config.min_calls {
            let failures = inner.samples.iter().filter(|(_, ok)| !ok).count();
            let rate = failures as f64 / inner.samples.len() as f64;
            if rate >= self.config.failure_rate_threshold {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                tracing::warn!(
                    failure_rate = rate,
                    samples = inner.samples.len(),
                    "circuit breaker tripped open"
                );
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
