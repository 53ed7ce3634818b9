//! Cache Entry Types
//!
//! Keys, per-entry metadata, and the sovereignty context attached to
//! culturally sensitive writes.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cache key - composite of namespace and key
#[derive(Clone, Debug, Eq)]
pub struct CacheKey {
    /// Namespace hash (for fast comparison)
    namespace_hash: u64,
    /// Key hash
    key_hash: u64,
    /// Full namespace (for collision resolution)
    namespace: String,
    /// Full key
    key: String,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let key = key.into();

        let namespace_hash = fx_hash(namespace.as_bytes());
        let key_hash = fx_hash(key.as_bytes());

        Self {
            namespace_hash,
            key_hash,
            namespace,
            key,
        }
    }

    /// Get namespace
    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get key
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Combined hash for shard selection and quick comparison
    #[inline]
    pub fn combined_hash(&self) -> u64 {
        self.namespace_hash ^ self.key_hash
    }

    /// Wire form used by the distributed tier (`namespace:key`)
    pub fn qualified(&self) -> String {
        format!("{}:{}", self.namespace, self.key)
    }

    /// Deterministic replica shard index for this key
    #[inline]
    pub fn replica_shard(&self, shard_count: usize) -> usize {
        (self.combined_hash() as usize) % shard_count.max(1)
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: compare hashes first
        if self.namespace_hash != other.namespace_hash || self.key_hash != other.key_hash {
            return false;
        }
        self.namespace == other.namespace && self.key == other.key
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace_hash.hash(state);
        self.key_hash.hash(state);
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

/// Fast non-cryptographic hash (FxHash algorithm)
#[inline]
pub fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

/// Sovereignty context attached to a culturally sensitive write
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SovereigntyContext {
    /// Owning nation
    pub nation: Option<String>,
    /// Owning territory
    pub territory: Option<String>,
    /// Where the data physically resides
    pub data_location: Option<String>,
    /// Elder approval granted
    pub elder_approved: bool,
    /// Community consent granted
    pub community_consent: bool,
    /// Whether the data may be stored outside its territory
    pub can_leave_territory: bool,
}

/// Metadata for cache entries
#[derive(Debug)]
pub struct EntryMetadata {
    /// Encoded size in bytes
    size: u64,
    /// Last access timestamp (epoch seconds)
    last_access: AtomicU64,
    /// Access count for frequency-based eviction
    access_count: AtomicU32,
    /// Creation timestamp (epoch seconds)
    created_at: u64,
    /// TTL in seconds (0 = never expire)
    ttl_seconds: u64,
    /// Entry version, incremented on re-set
    version: AtomicU32,
    /// Checksum of the serialized (pre-compression) value
    checksum: u64,
    /// Whether the stored bytes are compressed
    compressed: bool,
}

impl EntryMetadata {
    /// Create new entry metadata
    pub fn new(size: u64, checksum: u64, compressed: bool) -> Self {
        let now = epoch_seconds();

        Self {
            size,
            last_access: AtomicU64::new(now),
            access_count: AtomicU32::new(1),
            created_at: now,
            ttl_seconds: 0,
            version: AtomicU32::new(1),
            checksum,
            compressed,
        }
    }

    /// Create with TTL
    pub fn with_ttl(size: u64, checksum: u64, compressed: bool, ttl: Duration) -> Self {
        let mut meta = Self::new(size, checksum, compressed);
        meta.ttl_seconds = ttl.as_secs();
        meta
    }

    /// Encoded size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Record an access and return the new count
    #[inline]
    pub fn record_access(&self) -> u32 {
        self.last_access.store(epoch_seconds(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get access count
    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Creation time (epoch seconds)
    #[inline]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// TTL in seconds (0 = never expire)
    #[inline]
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Check if entry has expired. TTL 0 means never.
    #[inline]
    pub fn is_expired(&self) -> bool {
        if self.ttl_seconds == 0 {
            return false;
        }
        epoch_seconds() >= self.created_at + self.ttl_seconds
    }

    /// Checksum of the serialized value
    #[inline]
    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    /// Whether the stored bytes are compressed
    #[inline]
    pub fn compressed(&self) -> bool {
        self.compressed
    }

    /// Bump the version (re-set of an existing key)
    #[inline]
    pub fn increment_version(&self) -> u32 {
        self.version.fetch_add(1, Ordering::Release) + 1
    }

    /// Current version
    #[inline]
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// Eviction score (higher = more evictable): age over frequency
    pub fn eviction_score(&self) -> f64 {
        let age = epoch_seconds().saturating_sub(self.last_access.load(Ordering::Relaxed)) as f64;
        let frequency = self.access_count.load(Ordering::Relaxed) as f64;
        age / (frequency + 1.0)
    }
}

impl Clone for EntryMetadata {
    fn clone(&self) -> Self {
        Self {
            size: self.size,
            last_access: AtomicU64::new(self.last_access.load(Ordering::Relaxed)),
            access_count: AtomicU32::new(self.access_count.load(Ordering::Relaxed)),
            created_at: self.created_at,
            ttl_seconds: self.ttl_seconds,
            version: AtomicU32::new(self.version.load(Ordering::Relaxed)),
            checksum: self.checksum,
            compressed: self.compressed,
        }
    }
}

fn epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Cache entry containing encoded bytes and metadata
#[derive(Clone)]
pub struct CacheEntry {
    /// Entry metadata
    pub metadata: EntryMetadata,
    /// Encoded value bytes (zero-copy)
    data: bytes::Bytes,
    /// Sovereignty context, present only for validated sensitive writes
    sovereignty: Option<SovereigntyContext>,
    /// Free-form tags for pattern invalidation and audit
    tags: Vec<String>,
}

impl CacheEntry {
    /// Create a new entry from encoded bytes
    pub fn new(data: bytes::Bytes, checksum: u64, compressed: bool) -> Self {
        Self {
            metadata: EntryMetadata::new(data.len() as u64, checksum, compressed),
            data,
            sovereignty: None,
            tags: Vec::new(),
        }
    }

    /// Create with TTL
    pub fn with_ttl(data: bytes::Bytes, checksum: u64, compressed: bool, ttl: Duration) -> Self {
        Self {
            metadata: EntryMetadata::with_ttl(data.len() as u64, checksum, compressed, ttl),
            data,
            sovereignty: None,
            tags: Vec::new(),
        }
    }

    /// Attach a validated sovereignty context
    pub fn with_sovereignty(mut self, ctx: SovereigntyContext) -> Self {
        self.sovereignty = Some(ctx);
        self
    }

    /// Attach tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Encoded bytes (zero-copy)
    #[inline]
    pub fn data(&self) -> &bytes::Bytes {
        &self.data
    }

    /// Encoded size
    #[inline]
    pub fn size(&self) -> u64 {
        self.metadata.size()
    }

    /// Sovereignty context if present
    pub fn sovereignty(&self) -> Option<&SovereigntyContext> {
        self.sovereignty.as_ref()
    }

    /// Tags
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Record access
    #[inline]
    pub fn record_access(&self) -> u32 {
        self.metadata.record_access()
    }

    /// Check if expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.metadata.is_expired()
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("size", &self.metadata.size())
            .field("compressed", &self.metadata.compressed())
            .field("access_count", &self.metadata.access_count())
            .field("is_expired", &self.is_expired())
            .field("sovereignty", &self.sovereignty.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_creation() {
        let key = CacheKey::new("rfq", "rfq:42");
        assert_eq!(key.namespace(), "rfq");
        assert_eq!(key.key(), "rfq:42");
        assert_eq!(key.qualified(), "rfq:rfq:42");
    }

    #[test]
    fn test_cache_key_equality() {
        let key1 = CacheKey::new("ns", "key");
        let key2 = CacheKey::new("ns", "key");
        let key3 = CacheKey::new("ns", "different");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_replica_shard_deterministic() {
        let key = CacheKey::new("ns", "key-7");
        let shard1 = key.replica_shard(8);
        let shard2 = CacheKey::new("ns", "key-7").replica_shard(8);
        assert_eq!(shard1, shard2);
        assert!(shard1 < 8);
    }

    #[test]
    fn test_replica_shard_distribution() {
        let mut counts = vec![0usize; 8];
        for i in 0..8000 {
            let key = CacheKey::new("ns", format!("key-{}", i));
            counts[key.replica_shard(8)] += 1;
        }
        // No shard should be grossly over-represented
        let max = counts.iter().max().unwrap();
        assert!(*max < 2400, "uneven replica distribution: {}", max);
    }

    #[test]
    fn test_metadata_access_tracking() {
        let meta = EntryMetadata::new(1024, 0xBEEF, false);
        assert_eq!(meta.access_count(), 1);

        let count = meta.record_access();
        assert_eq!(count, 2);
        assert_eq!(meta.access_count(), 2);
    }

    #[test]
    fn test_metadata_ttl_zero_never_expires() {
        let meta = EntryMetadata::new(1024, 0, false);
        assert_eq!(meta.ttl_seconds(), 0);
        assert!(!meta.is_expired());
    }

    #[test]
    fn test_metadata_ttl() {
        let meta = EntryMetadata::with_ttl(1024, 0, false, Duration::from_secs(3600));
        assert!(!meta.is_expired());
    }

    #[test]
    fn test_metadata_version() {
        let meta = EntryMetadata::new(1024, 0, false);
        assert_eq!(meta.version(), 1);

        assert_eq!(meta.increment_version(), 2);
        assert_eq!(meta.version(), 2);
    }

    #[test]
    fn test_eviction_score_favors_hot_entries() {
        let meta = EntryMetadata::new(1024, 0, false);
        for _ in 0..100 {
            meta.record_access();
        }
        assert!(meta.eviction_score() < 1.0);
    }

    #[test]
    fn test_cache_entry_sovereignty() {
        let entry = CacheEntry::new(bytes::Bytes::from_static(b"data"), 1, false);
        assert!(entry.sovereignty().is_none());

        let ctx = SovereigntyContext {
            nation: Some("Yolngu".to_string()),
            territory: Some("Arnhem Land".to_string()),
            elder_approved: true,
            community_consent: true,
            ..Default::default()
        };
        let entry = entry.with_sovereignty(ctx.clone());
        assert_eq!(entry.sovereignty(), Some(&ctx));
    }

    #[test]
    fn test_metadata_clone_preserves_counters() {
        let meta = EntryMetadata::new(1024, 0xABCD, true);
        meta.record_access();
        meta.record_access();

        let cloned = meta.clone();
        assert_eq!(cloned.size(), 1024);
        assert_eq!(cloned.checksum(), 0xABCD);
        assert!(cloned.compressed());
        assert_eq!(cloned.access_count(), 3);
    }
}
