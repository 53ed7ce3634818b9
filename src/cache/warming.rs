//! Cache Warming
//!
//! Pre-populates the cache tiers from a warm source in batches. A warming
//! run is best-effort: individual batch failures are recorded but do not
//! abort the run, and a partially warmed cache is kept.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::coordinator::{CacheCoordinator, CacheOptions};
use crate::error::{Error, Result};

/// A source of entries to warm the cache with. The source yields batches
/// until it returns an empty batch.
#[async_trait]
pub trait WarmSource: Send + Sync {
    /// Source name, used in logs and run reports
    fn name(&self) -> &str;

    /// Fetch the next batch of (key, value) pairs, at most `batch_size`
    async fn next_batch(&self, batch_size: usize) -> Result<Vec<(String, serde_json::Value)>>;
}

/// Warming configuration
#[derive(Debug, Clone)]
pub struct WarmingConfig {
    /// Entries fetched and written per batch
    pub batch_size: usize,
    /// TTL applied to warmed entries; 0 = never expire
    pub ttl_seconds: u64,
    /// Namespace warmed entries are written under
    pub namespace: String,
    /// Hard cap on entries per run, 0 = unlimited
    pub max_entries: usize,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            ttl_seconds: 3600,
            namespace: "default".to_string(),
            max_entries: 0,
        }
    }
}

/// Outcome of a single warming run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmingReport {
    /// Unique run identifier
    pub run_id: String,
    /// Source that fed the run
    pub source: String,
    /// Entries successfully written
    pub warmed: u64,
    /// Batches that failed to fetch or write
    pub failed_batches: u64,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

/// Drives warming runs against a coordinator
pub struct CacheWarmer {
    cache: Arc<CacheCoordinator>,
    config: WarmingConfig,
}

impl CacheWarmer {
    pub fn new(cache: Arc<CacheCoordinator>) -> Self {
        Self::with_config(cache, WarmingConfig::default())
    }

    pub fn with_config(cache: Arc<CacheCoordinator>, config: WarmingConfig) -> Self {
        Self { cache, config }
    }

    /// Run warming to completion against one source. Fails only when the
    /// source yields nothing at all and every batch errored.
    pub async fn warm(&self, source: &dyn WarmSource) -> Result<WarmingReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut warmed = 0u64;
        let mut failed_batches = 0u64;

        tracing::info!(run_id = %run_id, source = source.name(), "cache warming started");

        loop {
            if self.config.max_entries > 0 && warmed as usize >= self.config.max_entries {
                break;
            }

            let batch = match source.next_batch(self.config.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    failed_batches += 1;
                    tracing::warn!(run_id = %run_id, error = %e, "warm batch fetch failed");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            let batch_len = batch.len() as u64;
            let options = CacheOptions {
                ttl_seconds: self.config.ttl_seconds,
                ..Default::default()
            };
            match self
                .cache
                .mset(&batch, &self.config.namespace, &options)
                .await
            {
                Ok(()) => warmed += batch_len,
                Err(e) => {
                    failed_batches += 1;
                    tracing::warn!(run_id = %run_id, error = %e, "warm batch write failed");
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;

        if warmed == 0 && failed_batches > 0 {
            return Err(Error::WarmupFailed {
                run_id,
                reason: format!("{} batches failed, nothing warmed", failed_batches),
            });
        }

        tracing::info!(
            run_id = %run_id,
            source = source.name(),
            warmed,
            failed_batches,
            duration_ms,
            "cache warming finished"
        );

        Ok(WarmingReport {
            run_id,
            source: source.name().to_string(),
            warmed,
            failed_batches,
            duration_ms,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
