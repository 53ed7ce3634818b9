//! Persistent Metadata Store
//!
//! Structured store behind the [`MetadataStore`] trait: upsert, find, and
//! bulk-update over cache entry records. Used for audit, fallback reads when
//! the distributed tier is unavailable, and cross-restart durability. An
//! in-memory implementation ships for tests and single-node mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::entry::SovereigntyContext;
use crate::error::Result;

/// Reason an entry record was invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Explicit single-key delete
    Deleted,
    /// Removed by a pattern delete
    PatternDeleted,
    /// TTL elapsed
    Expired,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Deleted => write!(f, "deleted"),
            InvalidationReason::PatternDeleted => write!(f, "pattern_deleted"),
            InvalidationReason::Expired => write!(f, "expired"),
        }
    }
}

/// Durable record of one cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRecord {
    /// Key within the namespace
    pub key: String,
    /// Namespace
    pub namespace: String,
    /// Encoded value bytes (for fallback reads)
    pub value: Vec<u8>,
    /// Whether `value` is compressed
    pub compressed: bool,
    /// Checksum of the serialized form
    pub checksum: u64,
    /// TTL in seconds (0 = never expire)
    pub ttl_seconds: u64,
    /// Absolute expiry, if any
    pub expires_at: Option<DateTime<Utc>>,
    /// Sovereignty context for validated sensitive writes
    pub sovereignty: Option<SovereigntyContext>,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Record version, bumped on re-set
    pub version: u32,
    /// Soft-delete marker with reason
    pub invalidated: Option<InvalidationReason>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl EntryRecord {
    /// Whether this record is live (not invalidated, not expired)
    pub fn is_live(&self) -> bool {
        if self.invalidated.is_some() {
            return false;
        }
        match self.expires_at {
            Some(t) => Utc::now() < t,
            None => true,
        }
    }
}

/// Persistent store for cache entry metadata
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace a record, bumping the version on replace
    async fn upsert_entry(&self, record: EntryRecord) -> Result<u32>;

    /// Find a live record by namespace and key
    async fn find_entry(&self, namespace: &str, key: &str) -> Result<Option<EntryRecord>>;

    /// Soft-delete records by qualified key, returning the count updated
    async fn invalidate_entries(
        &self,
        qualified_keys: &[String],
        reason: InvalidationReason,
    ) -> Result<u64>;
}

/// In-memory metadata store keyed by `namespace:key`
pub struct InMemoryMetadataStore {
    records: DashMap<String, EntryRecord>,
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl InMemoryMetadataStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn record_key(namespace: &str, key: &str) -> String {
        format!("{}:{}", namespace, key)
    }

    /// Total record count, including invalidated rows (audit trail)
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn upsert_entry(&self, mut record: EntryRecord) -> Result<u32> {
        let id = Self::record_key(&record.namespace, &record.key);
        record.updated_at = Utc::now();

        let version = match self.records.get(&id) {
            Some(existing) => existing.version + 1,
            None => 1,
        };
        record.version = version;
        record.invalidated = None;
        self.records.insert(id, record);
        Ok(version)
    }

    async fn find_entry(&self, namespace: &str, key: &str) -> Result<Option<EntryRecord>> {
        let id = Self::record_key(namespace, key);
        Ok(self
            .records
            .get(&id)
            .filter(|r| r.is_live())
            .map(|r| r.clone()))
    }

    async fn invalidate_entries(
        &self,
        qualified_keys: &[String],
        reason: InvalidationReason,
    ) -> Result<u64> {
        let mut updated = 0;
        for key in qualified_keys {
            if let Some(mut record) = self.records.get_mut(key) {
                if record.invalidated.is_none() {
                    record.invalidated = Some(reason);
                    record.updated_at = Utc::now();
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }
}

// =============================================================================
// Tests
// =============================================================================
