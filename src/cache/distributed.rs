//! Distributed Shared Tier
//!
//! The distributed tier is an external key-value store exposed through the
//! [`DistributedStore`] trait: get, set-with-ttl, mget, delete, pattern key
//! scan, TTL inspection, and pipelined batch writes. The coordinator treats
//! the store as a black box; an in-memory implementation ships for tests and
//! single-node deployments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Wire form of a cache value in the distributed tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireValue {
    /// Stored bytes (possibly compressed)
    pub bytes: Vec<u8>,
    /// Whether `bytes` is compressed
    pub compressed: bool,
    /// Checksum of the serialized (pre-compression) form
    pub checksum: u64,
}

/// Operations the distributed shared tier must provide
#[async_trait]
pub trait DistributedStore: Send + Sync {
    /// Get a value
    async fn get(&self, key: &str) -> Result<Option<WireValue>>;

    /// Set a value with a TTL (0 = never expire)
    async fn set_ex(&self, key: &str, value: WireValue, ttl_seconds: u64) -> Result<()>;

    /// Get many values in one round-trip
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<WireValue>>>;

    /// Delete a key, returning whether it existed
    async fn del(&self, key: &str) -> Result<bool>;

    /// Scan keys matching a glob-style pattern (single `*` wildcard)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Remaining TTL in seconds (None if the key is absent, 0 = no expiry)
    async fn ttl(&self, key: &str) -> Result<Option<u64>>;

    /// Reset a key's TTL
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool>;

    /// Pipelined batch write
    async fn pipeline_set(&self, items: Vec<(String, WireValue, u64)>) -> Result<()>;
}

/// Match a key against a glob pattern with at most one `*`
pub fn glob_match(pattern: &str, key: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            key.len() >= prefix.len() + suffix.len()
                && key.starts_with(prefix)
                && key.ends_with(suffix)
        }
        None => pattern == key,
    }
}

struct StoredValue {
    value: WireValue,
    /// None = never expires
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| Instant::now() >= t)
    }
}

/// In-memory distributed store for tests and single-node mode
pub struct InMemoryDistributedStore {
    storage: DashMap<String, StoredValue>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Default for InMemoryDistributedStore {
    fn default() -> Self {
        Self {
            storage: DashMap::new(),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }
}

impl InMemoryDistributedStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Read operation count
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Write operation count
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn expiry_for(ttl_seconds: u64) -> Option<Instant> {
        (ttl_seconds > 0).then(|| Instant::now() + Duration::from_secs(ttl_seconds))
    }
}

#[async_trait]
impl DistributedStore for InMemoryDistributedStore {
    async fn get(&self, key: &str) -> Result<Option<WireValue>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        if let Some(stored) = self.storage.get(key) {
            if stored.is_expired() {
                drop(stored);
                self.storage.remove(key);
                return Ok(None);
            }
            return Ok(Some(stored.value.clone()));
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: WireValue, ttl_seconds: u64) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.storage.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: Self::expiry_for(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<WireValue>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.remove(key).is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .storage
            .iter()
            .filter(|kv| !kv.value().is_expired() && glob_match(pattern, kv.key()))
            .map(|kv| kv.key().clone())
            .collect())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.get(key).and_then(|stored| {
            if stored.is_expired() {
                None
            } else {
                Some(match stored.expires_at {
                    Some(t) => t.saturating_duration_since(Instant::now()).as_secs(),
                    None => 0,
                })
            }
        }))
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if let Some(mut stored) = self.storage.get_mut(key) {
            stored.expires_at = Self::expiry_for(ttl_seconds);
            return Ok(true);
        }
        Ok(false)
    }

    async fn pipeline_set(&self, items: Vec<(String, WireValue, u64)>) -> Result<()> {
        for (key, value, ttl) in items {
            self.set_ex(&key, value, ttl).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(data: &[u8]) -> WireValue {
        WireValue {
            bytes: data.to_vec(),
            compressed: false,
            checksum: 0,
        }
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("ns:*", "ns:key1"));
        assert!(glob_match("ns:*", "ns:"));
        assert!(!glob_match("ns:*", "other:key"));
        assert!(glob_match("*:suffix", "anything:suffix"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "not-exact"));
    }

    #[tokio::test]
    async fn test_set_get() {
        let store = InMemoryDistributedStore::new();

        store.set_ex("ns:k1", wire(b"data"), 0).await.unwrap();
        let got = store.get("ns:k1").await.unwrap().unwrap();
        assert_eq!(got.bytes, b"data");
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = InMemoryDistributedStore::new();

        store.set_ex("ns:short", wire(b"x"), 1).await.unwrap();
        assert!(store.get("ns:short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(store.get("ns:short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_zero_never_expires() {
        let store = InMemoryDistributedStore::new();
        store.set_ex("ns:keep", wire(b"x"), 0).await.unwrap();
        assert_eq!(store.ttl("ns:keep").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_mget_mixed() {
        let store = InMemoryDistributedStore::new();
        store.set_ex("ns:a", wire(b"1"), 0).await.unwrap();
        store.set_ex("ns:c", wire(b"3"), 0).await.unwrap();

        let got = store
            .mget(&["ns:a".into(), "ns:b".into(), "ns:c".into()])
            .await
            .unwrap();
        assert!(got[0].is_some());
        assert!(got[1].is_none());
        assert!(got[2].is_some());
    }

    #[tokio::test]
    async fn test_keys_pattern_scan() {
        let store = InMemoryDistributedStore::new();
        store.set_ex("ns:a", wire(b"1"), 0).await.unwrap();
        store.set_ex("ns:b", wire(b"2"), 0).await.unwrap();
        store.set_ex("other:c", wire(b"3"), 0).await.unwrap();

        let mut keys = store.keys("ns:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["ns:a".to_string(), "ns:b".to_string()]);
    }

    #[tokio::test]
    async fn test_del() {
        let store = InMemoryDistributedStore::new();
        store.set_ex("ns:a", wire(b"1"), 0).await.unwrap();

        assert!(store.del("ns:a").await.unwrap());
        assert!(!store.del("ns:a").await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_resets_ttl() {
        let store = InMemoryDistributedStore::new();
        store.set_ex("ns:a", wire(b"1"), 1).await.unwrap();

        assert!(store.expire("ns:a", 3600).await.unwrap());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(store.get("ns:a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pipeline_set() {
        let store = InMemoryDistributedStore::new();
        store
            .pipeline_set(vec![
                ("ns:a".into(), wire(b"1"), 0),
                ("ns:b".into(), wire(b"2"), 0),
            ])
            .await
            .unwrap();

        assert!(store.get("ns:a").await.unwrap().is_some());
        assert!(store.get("ns:b").await.unwrap().is_some());
    }
}
