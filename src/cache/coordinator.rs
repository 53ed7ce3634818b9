//! Cache Coordinator - Unified Multi-Tier Cache
//!
//! Orchestrates the two in-process tiers, the distributed shared tier, and
//! the persistent-store fallback. Lookups walk the tiers in fixed order and
//! promote hits back into the faster tiers; writes fan out to every tier
//! after sovereignty validation and encoding.

use std::sync::Arc;

use super::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use super::codec::{Codec, CodecConfig};
use super::distributed::{glob_match, DistributedStore, WireValue};
use super::entry::{CacheEntry, CacheKey, SovereigntyContext};
use super::memory::{MemoryTier, MemoryTierConfig};
use super::metrics::{CacheMetrics, CacheMetricsSnapshot, LatencyTracker};
use super::persistent::{EntryRecord, InvalidationReason, MetadataStore};
use super::sovereignty::SovereigntyValidator;
use crate::error::{Error, Result};

/// Cache tier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Hot in-process tier
    Tier1,
    /// Secondary in-process tier
    Tier2,
    /// Distributed shared tier
    Distributed,
    /// Persistent-store fallback
    Fallback,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::Tier1 => write!(f, "tier1 (hot)"),
            CacheTier::Tier2 => write!(f, "tier2 (warm)"),
            CacheTier::Distributed => write!(f, "distributed"),
            CacheTier::Fallback => write!(f, "fallback (store)"),
        }
    }
}

/// Per-call cache options. Every field has a documented default; the
/// sovereignty fields are only consulted when `indigenous_data` is set.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// TTL in seconds; 0 = never expire
    pub ttl_seconds: u64,
    /// Consult the persistent store when all cache tiers miss
    pub fallback_to_db: bool,
    /// Also write a consistent-hash replica shard
    pub replicate: bool,
    /// Marks the value as culturally sensitive; triggers validation
    pub indigenous_data: bool,
    /// Owning nation (sovereignty)
    pub nation: Option<String>,
    /// Owning territory (sovereignty)
    pub territory: Option<String>,
    /// Physical data location (sovereignty)
    pub data_location: Option<String>,
    /// Elder approval granted (sovereignty)
    pub elder_approved: bool,
    /// Community consent granted (sovereignty)
    pub community_consent: bool,
    /// Whether the data may leave its territory (sovereignty)
    pub can_leave_territory: bool,
    /// Free-form tags recorded with the entry
    pub tags: Vec<String>,
}

impl CacheOptions {
    fn sovereignty_context(&self) -> SovereigntyContext {
        SovereigntyContext {
            nation: self.nation.clone(),
            territory: self.territory.clone(),
            data_location: self.data_location.clone(),
            elder_approved: self.elder_approved,
            community_consent: self.community_consent,
            can_leave_territory: self.can_leave_territory,
        }
    }
}

/// Cache coordinator configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Hot in-process tier
    pub tier1: MemoryTierConfig,
    /// Secondary in-process tier
    pub tier2: MemoryTierConfig,
    /// Codec configuration
    pub codec: CodecConfig,
    /// Circuit breaker configuration
    pub breaker: BreakerConfig,
    /// Number of replica shards for `replicate` writes
    pub replica_shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tier1: MemoryTierConfig::default(),
            tier2: MemoryTierConfig {
                // Secondary tier is larger and colder
                capacity: 4 * super::memory::DEFAULT_MEMORY_CAPACITY,
                ..Default::default()
            },
            codec: CodecConfig::default(),
            breaker: BreakerConfig::default(),
            replica_shards: 8,
        }
    }
}

/// Unified cache coordinator
pub struct CacheCoordinator {
    tier1: MemoryTier,
    tier2: MemoryTier,
    distributed: Arc<dyn DistributedStore>,
    metadata: Arc<dyn MetadataStore>,
    breaker: CircuitBreaker,
    codec: Codec,
    validator: SovereigntyValidator,
    metrics: Arc<CacheMetrics>,
    config: CacheConfig,
}

impl CacheCoordinator {
    /// Create a coordinator with default configuration
    pub fn new(distributed: Arc<dyn DistributedStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self::with_config(CacheConfig::default(), distributed, metadata)
    }

    /// Create a coordinator with custom configuration
    pub fn with_config(
        config: CacheConfig,
        distributed: Arc<dyn DistributedStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            tier1: MemoryTier::with_config("tier1", config.tier1.clone()),
            tier2: MemoryTier::with_config("tier2", config.tier2.clone()),
            distributed,
            metadata,
            breaker: CircuitBreaker::with_config(config.breaker.clone()),
            codec: Codec::with_config(config.codec.clone()),
            validator: SovereigntyValidator::new(),
            metrics: Arc::new(CacheMetrics::new()),
            config,
        }
    }

    /// Look up a key across the tiers. Never errors on a miss; a failing
    /// tier is skipped in favor of the next one.
    pub async fn get(
        &self,
        key: &str,
        namespace: &str,
        options: &CacheOptions,
    ) -> Option<serde_json::Value> {
        self.lookup(key, namespace, options).await.map(|(v, _)| v)
    }

    /// Look up a key and report which tier served it
    pub async fn lookup(
        &self,
        key: &str,
        namespace: &str,
        options: &CacheOptions,
    ) -> Option<(serde_json::Value, CacheTier)> {
        let tracker = LatencyTracker::start();
        let cache_key = CacheKey::new(namespace, key);

        // Tier 1
        if let Some(entry) = self.tier1.get(&cache_key) {
            if let Some(value) = self.decode_entry(&cache_key, &entry) {
                self.metrics.record_tier1_hit();
                self.metrics.record_read_latency(tracker.elapsed());
                return Some((value, CacheTier::Tier1));
            }
        }
        self.metrics.record_tier1_miss();

        // Tier 2
        if let Some(entry) = self.tier2.get(&cache_key) {
            if let Some(value) = self.decode_entry(&cache_key, &entry) {
                self.metrics.record_tier2_hit();
                self.tier1.put(cache_key.clone(), entry);
                self.metrics.record_promotion();
                self.metrics.record_read_latency(tracker.elapsed());
                return Some((value, CacheTier::Tier2));
            }
        }
        self.metrics.record_tier2_miss();

        // Distributed tier, behind the breaker
        match self.distributed_get(&cache_key).await {
            Ok(Some((value, entry))) => {
                self.metrics.record_distributed_hit();
                self.promote_to_memory(&cache_key, entry);
                self.metrics.record_read_latency(tracker.elapsed());
                return Some((value, CacheTier::Distributed));
            }
            Ok(None) => {
                self.metrics.record_distributed_miss();
            }
            Err(Error::CircuitOpen { .. }) => {
                self.metrics.record_distributed_bypass();
            }
            Err(e) => {
                self.metrics.record_distributed_error();
                tracing::warn!(key = %cache_key, error = %e, "distributed tier lookup failed");
            }
        }

        // Persistent-store fallback, only when asked for
        if options.fallback_to_db {
            match self.metadata.find_entry(namespace, key).await {
                Ok(Some(record)) => {
                    if let Ok(value) =
                        self.codec
                            .decode(&record.value, record.compressed, record.checksum)
                    {
                        self.metrics.record_fallback_hit();
                        let entry = self.entry_from_record(&record);
                        self.promote_to_memory(&cache_key, entry);
                        self.metrics.record_read_latency(tracker.elapsed());
                        return Some((value, CacheTier::Fallback));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %cache_key, error = %e, "fallback read failed");
                }
            }
            self.metrics.record_fallback_miss();
        }

        None
    }

    /// Write a value to every tier. Sovereignty-flagged writes are validated
    /// before any tier is touched; a validation failure aborts the whole
    /// write.
    pub async fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
        namespace: &str,
        options: &CacheOptions,
    ) -> Result<()> {
        let tracker = LatencyTracker::start();
        let cache_key = CacheKey::new(namespace, key);

        let sovereignty = if options.indigenous_data {
            let ctx = options.sovereignty_context();
            if let Err(e) = self.validator.validate(&ctx) {
                self.metrics.record_sovereignty_block();
                tracing::warn!(key = %cache_key, error = %e, "sovereignty validation blocked write");
                return Err(e);
            }
            Some(ctx)
        } else {
            None
        };

        let encoded = self.codec.encode(value)?;
        let mut entry = CacheEntry::with_ttl(
            encoded.bytes.clone(),
            encoded.checksum,
            encoded.compressed,
            std::time::Duration::from_secs(options.ttl_seconds),
        )
        .with_tags(options.tags.clone());
        if let Some(ctx) = &sovereignty {
            entry = entry.with_sovereignty(ctx.clone());
        }

        // In-process tiers
        self.tier1.put(cache_key.clone(), entry.clone());
        self.tier2.put(cache_key.clone(), entry.clone());

        // Distributed tier; an open breaker degrades to the durable path
        let wire = WireValue {
            bytes: encoded.bytes.to_vec(),
            compressed: encoded.compressed,
            checksum: encoded.checksum,
        };
        let qualified = cache_key.qualified();
        let set_result = self
            .breaker
            .call("set", async {
                self.distributed
                    .set_ex(&qualified, wire.clone(), options.ttl_seconds)
                    .await
            })
            .await;
        match set_result {
            Ok(()) => {
                if options.replicate {
                    let replica = self.replica_key(&cache_key);
                    if let Err(e) = self
                        .distributed
                        .set_ex(&replica, wire.clone(), options.ttl_seconds)
                        .await
                    {
                        tracing::warn!(key = %cache_key, error = %e, "replica write failed");
                    }
                }
            }
            Err(Error::CircuitOpen { .. }) => {
                self.metrics.record_distributed_bypass();
            }
            Err(e) => {
                self.metrics.record_distributed_error();
                tracing::warn!(key = %cache_key, error = %e, "distributed write failed");
            }
        }

        // Durable metadata row; this is the write that must not be skipped
        self.metadata
            .upsert_entry(self.record_for(&cache_key, &wire, options, sovereignty))
            .await?;

        self.metrics.record_write_latency(tracker.elapsed());
        Ok(())
    }

    /// Delete a key from every tier, soft-deleting its metadata row
    pub async fn delete(&self, key: &str, namespace: &str) -> Result<bool> {
        let cache_key = CacheKey::new(namespace, key);
        let mut deleted = false;

        if self.tier1.remove(&cache_key).is_some() {
            deleted = true;
        }
        if self.tier2.remove(&cache_key).is_some() {
            deleted = true;
        }

        let qualified = cache_key.qualified();
        match self
            .breaker
            .call("del", self.distributed.del(&qualified))
            .await
        {
            Ok(true) => deleted = true,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(key = %cache_key, error = %e, "distributed delete failed");
            }
        }

        self.metadata
            .invalidate_entries(&[qualified], InvalidationReason::Deleted)
            .await?;

        Ok(deleted)
    }

    /// Delete every key matching a glob pattern within a namespace,
    /// returning the number of keys removed
    pub async fn delete_pattern(&self, pattern: &str, namespace: &str) -> Result<u64> {
        let qualified_pattern = format!("{}:{}", namespace, pattern);

        // Enumerate via the distributed tier's key scan
        let mut qualified: Vec<String> = match self
            .breaker
            .call("keys", self.distributed.keys(&qualified_pattern))
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(pattern = %qualified_pattern, error = %e, "pattern scan failed");
                Vec::new()
            }
        };

        // In-process tiers may hold keys the distributed tier lost
        for key in self.tier1.keys().into_iter().chain(self.tier2.keys()) {
            let q = key.qualified();
            if glob_match(&qualified_pattern, &q) && !qualified.contains(&q) {
                qualified.push(q);
            }
        }

        let mut removed = 0u64;
        for q in &qualified {
            let Some(plain) = q.strip_prefix(&format!("{}:", namespace)) else {
                continue;
            };
            let cache_key = CacheKey::new(namespace, plain);
            let in_tier1 = self.tier1.remove(&cache_key).is_some();
            let in_tier2 = self.tier2.remove(&cache_key).is_some();
            let in_distributed = match self.distributed.del(q).await {
                Ok(deleted) => deleted,
                Err(e) => {
                    tracing::warn!(key = %q, error = %e, "pattern delete failed for key");
                    false
                }
            };
            if in_tier1 || in_tier2 || in_distributed {
                removed += 1;
            }
        }

        self.metadata
            .invalidate_entries(&qualified, InvalidationReason::PatternDeleted)
            .await?;

        Ok(removed)
    }

    /// Batched lookup: tier 1 first, then one distributed round-trip for the
    /// remainder, promoting resolved keys into tier 1
    pub async fn mget(&self, keys: &[String], namespace: &str) -> Vec<Option<serde_json::Value>> {
        let mut results: Vec<Option<serde_json::Value>> = vec![None; keys.len()];
        let mut remaining: Vec<(usize, CacheKey)> = Vec::new();

        for (i, key) in keys.iter().enumerate() {
            let cache_key = CacheKey::new(namespace, key.as_str());
            match self.tier1.get(&cache_key) {
                Some(entry) => {
                    if let Some(value) = self.decode_entry(&cache_key, &entry) {
                        self.metrics.record_tier1_hit();
                        results[i] = Some(value);
                        continue;
                    }
                    remaining.push((i, cache_key));
                }
                None => {
                    self.metrics.record_tier1_miss();
                    remaining.push((i, cache_key));
                }
            }
        }

        if remaining.is_empty() {
            return results;
        }

        let qualified: Vec<String> = remaining.iter().map(|(_, k)| k.qualified()).collect();
        let fetched = match self
            .breaker
            .call("mget", self.distributed.mget(&qualified))
            .await
        {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(error = %e, "batched distributed lookup failed");
                return results;
            }
        };

        for ((i, cache_key), wire) in remaining.into_iter().zip(fetched) {
            let Some(wire) = wire else {
                self.metrics.record_distributed_miss();
                continue;
            };
            match self
                .codec
                .decode(&wire.bytes, wire.compressed, wire.checksum)
            {
                Ok(value) => {
                    self.metrics.record_distributed_hit();
                    let entry = CacheEntry::new(
                        bytes::Bytes::from(wire.bytes),
                        wire.checksum,
                        wire.compressed,
                    );
                    self.tier1.put(cache_key, entry);
                    self.metrics.record_promotion();
                    results[i] = Some(value);
                }
                Err(e) => {
                    tracing::warn!(key = %cache_key, error = %e, "decode failed in mget");
                }
            }
        }

        results
    }

    /// Batched write: tier 1 synchronously, distributed tier in one pipeline
    pub async fn mset(
        &self,
        items: &[(String, serde_json::Value)],
        namespace: &str,
        options: &CacheOptions,
    ) -> Result<()> {
        let mut pipeline = Vec::with_capacity(items.len());

        for (key, value) in items {
            let cache_key = CacheKey::new(namespace, key.as_str());
            let encoded = self.codec.encode(value)?;

            let entry = CacheEntry::with_ttl(
                encoded.bytes.clone(),
                encoded.checksum,
                encoded.compressed,
                std::time::Duration::from_secs(options.ttl_seconds),
            );
            self.tier1.put(cache_key.clone(), entry);

            let wire = WireValue {
                bytes: encoded.bytes.to_vec(),
                compressed: encoded.compressed,
                checksum: encoded.checksum,
            };
            self.metadata
                .upsert_entry(self.record_for(&cache_key, &wire, options, None))
                .await?;
            pipeline.push((cache_key.qualified(), wire, options.ttl_seconds));
        }

        match self
            .breaker
            .call("pipeline_set", self.distributed.pipeline_set(pipeline))
            .await
        {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(error = %e, "pipelined distributed write failed");
            }
        }

        Ok(())
    }

    /// Circuit breaker state, for the monitoring consumer
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Metrics snapshot
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Hot tier reference (tests and monitoring)
    pub fn tier1(&self) -> &MemoryTier {
        &self.tier1
    }

    /// Secondary tier reference (tests and monitoring)
    pub fn tier2(&self) -> &MemoryTier {
        &self.tier2
    }

    /// Check whether a key exists in any tier (no promotion, no fallback)
    pub async fn exists(&self, key: &str, namespace: &str) -> bool {
        let cache_key = CacheKey::new(namespace, key);
        if self.tier1.contains(&cache_key) || self.tier2.contains(&cache_key) {
            return true;
        }
        matches!(
            self.distributed.get(&cache_key.qualified()).await,
            Ok(Some(_))
        )
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn decode_entry(&self, key: &CacheKey, entry: &CacheEntry) -> Option<serde_json::Value> {
        match self.codec.decode(
            entry.data(),
            entry.metadata.compressed(),
            entry.metadata.checksum(),
        ) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "corrupt cache entry, treating as miss");
                None
            }
        }
    }

    async fn distributed_get(
        &self,
        key: &CacheKey,
    ) -> Result<Option<(serde_json::Value, CacheEntry)>> {
        let qualified = key.qualified();
        let wire = self
            .breaker
            .call("get", self.distributed.get(&qualified))
            .await?;

        let Some(wire) = wire else {
            return Ok(None);
        };

        let value = self
            .codec
            .decode(&wire.bytes, wire.compressed, wire.checksum)?;
        let entry = CacheEntry::new(
            bytes::Bytes::from(wire.bytes),
            wire.checksum,
            wire.compressed,
        );
        Ok(Some((value, entry)))
    }

    fn promote_to_memory(&self, key: &CacheKey, entry: CacheEntry) {
        self.tier2.put(key.clone(), entry.clone());
        self.tier1.put(key.clone(), entry);
        self.metrics.record_promotion();
    }

    fn entry_from_record(&self, record: &EntryRecord) -> CacheEntry {
        CacheEntry::new(
            bytes::Bytes::from(record.value.clone()),
            record.checksum,
            record.compressed,
        )
    }

    fn replica_key(&self, key: &CacheKey) -> String {
        let shard = key.replica_shard(self.config.replica_shards);
        format!("replica:{}:{}", shard, key.qualified())
    }

    fn record_for(
        &self,
        key: &CacheKey,
        wire: &WireValue,
        options: &CacheOptions,
        sovereignty: Option<SovereigntyContext>,
    ) -> EntryRecord {
        let now = chrono::Utc::now();
        EntryRecord {
            key: key.key().to_string(),
            namespace: key.namespace().to_string(),
            value: wire.bytes.clone(),
            compressed: wire.compressed,
            checksum: wire.checksum,
            ttl_seconds: options.ttl_seconds,
            expires_at: (options.ttl_seconds > 0)
                .then(|| now + chrono::Duration::seconds(options.ttl_seconds as i64)),
            sovereignty,
            tags: options.tags.clone(),
            version: 1,
            invalidated: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
