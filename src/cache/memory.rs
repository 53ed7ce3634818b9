//! In-Process Cache Tiers
//!
//! The hot (tier 1) and secondary (tier 2) in-process tiers share one
//! implementation: a lock-striped map with capacity-based eviction driven by
//! an age/frequency score.

use std::sync::atomic::{AtomicU64, Ordering};

use super::entry::{CacheEntry, CacheKey};
use super::shard::StripedMap;

/// Stripe count for in-process tiers
pub const STRIPE_COUNT: usize = 256;

/// Default in-process tier capacity (256MB)
pub const DEFAULT_MEMORY_CAPACITY: u64 = 256 * 1024 * 1024;

/// In-process tier configuration
#[derive(Debug, Clone)]
pub struct MemoryTierConfig {
    /// Maximum capacity in bytes
    pub capacity: u64,
    /// High watermark percentage (trigger eviction)
    pub high_watermark: f64,
    /// Low watermark percentage (stop eviction)
    pub low_watermark: f64,
    /// Eviction batch size
    pub eviction_batch_size: usize,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_MEMORY_CAPACITY,
            high_watermark: 0.90,
            low_watermark: 0.80,
            eviction_batch_size: 1000,
        }
    }
}

/// An in-process cache tier
pub struct MemoryTier {
    /// Tier label for logging and metrics
    name: &'static str,
    /// Striped storage
    storage: StripedMap<CacheKey, CacheEntry, STRIPE_COUNT>,
    /// Configuration
    config: MemoryTierConfig,
    /// Current size in bytes
    current_size: AtomicU64,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count
    evictions: AtomicU64,
}

impl MemoryTier {
    /// Create a tier with default configuration
    pub fn new(name: &'static str) -> Self {
        Self::with_config(name, MemoryTierConfig::default())
    }

    /// Create a tier with custom configuration
    pub fn with_config(name: &'static str, config: MemoryTierConfig) -> Self {
        Self {
            name,
            storage: StripedMap::new(),
            config,
            current_size: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Tier label
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get an entry, dropping it if expired
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.storage.get(key);

        match &entry {
            Some(e) => {
                if e.is_expired() {
                    // A concurrent get may have already dropped the entry;
                    // only the remover adjusts the size account
                    let size = e.size();
                    if self.storage.remove(key, size).is_some() {
                        self.current_size.fetch_sub(size, Ordering::Relaxed);
                    }
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                e.record_access();
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }

        entry
    }

    /// Put an entry, evicting first if over the high watermark
    pub fn put(&self, key: CacheKey, entry: CacheEntry) -> bool {
        let size = entry.size();

        if self.should_evict() {
            self.evict();
        }

        if size > self.config.capacity {
            return false;
        }

        let old = self.storage.insert(key, entry, size, |e| e.size());

        if let Some(old_entry) = old {
            let old_size = old_entry.size();
            if size > old_size {
                self.current_size
                    .fetch_add(size - old_size, Ordering::Relaxed);
            } else {
                self.current_size
                    .fetch_sub(old_size - size, Ordering::Relaxed);
            }
        } else {
            self.current_size.fetch_add(size, Ordering::Relaxed);
        }

        true
    }

    /// Remove an entry
    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(entry) = self.storage.get(key) {
            let size = entry.size();
            if let Some(removed) = self.storage.remove(key, size) {
                self.current_size.fetch_sub(size, Ordering::Relaxed);
                return Some(removed);
            }
        }
        None
    }

    /// Check if the tier contains a key
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.storage.contains_key(key)
    }

    /// Snapshot all keys (used for pattern deletion)
    pub fn keys(&self) -> Vec<CacheKey> {
        self.storage.keys()
    }

    fn should_evict(&self) -> bool {
        let current = self.current_size.load(Ordering::Relaxed) as f64;
        current / self.config.capacity as f64 >= self.config.high_watermark
    }

    fn should_continue_eviction(&self) -> bool {
        let current = self.current_size.load(Ordering::Relaxed) as f64;
        current / self.config.capacity as f64 > self.config.low_watermark
    }

    /// Evict entries until the low watermark is reached
    fn evict(&self) {
        let mut candidates: Vec<(CacheKey, f64, u64)> = Vec::new();

        for i in 0..STRIPE_COUNT {
            for (key, entry) in self.storage.stripe(i).entries() {
                if entry.is_expired() {
                    // Expired entries always go first
                    candidates.push((key, f64::MAX, entry.size()));
                } else {
                    candidates.push((key, entry.metadata.eviction_score(), entry.size()));
                }
            }
        }

        // Highest score first = most evictable
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut evicted = 0;
        for (key, _, size) in candidates {
            if !self.should_continue_eviction() {
                break;
            }

            if self.storage.remove(&key, size).is_some() {
                self.current_size.fetch_sub(size, Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                evicted += 1;

                if evicted >= self.config.eviction_batch_size {
                    break;
                }
            }
        }

        if evicted > 0 {
            tracing::debug!(tier = self.name, evicted, "evicted entries");
        }
    }

    /// Current size in bytes
    pub fn size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.config.capacity
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Clear the tier
    pub fn clear(&self) {
        self.storage.clear();
        self.current_size.store(0, Ordering::Relaxed);
    }
}

// =============================================================================
// Tests
// =============================================================================
