//! Lock-Striped Map
//!
//! Concurrent hashmap used by the in-process cache tiers. Each stripe owns its
//! own RwLock so reads on different keys rarely contend.
//!
//! # Design
//!
//! - Power-of-2 stripe count enables fast modulo via bitwise AND
//! - Entry count and byte size tracked per stripe with atomics

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Single stripe containing a hashmap and its accounting
pub struct Stripe<K, V> {
    map: RwLock<HashMap<K, V>>,
    count: AtomicU64,
    size_bytes: AtomicU64,
}

impl<K, V> Default for Stripe<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Stripe<K, V> {
    /// Create a new empty stripe
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicU64::new(0),
            size_bytes: AtomicU64::new(0),
        }
    }

    /// Number of entries in this stripe
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    /// Check if the stripe is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size of values in bytes
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }
}

impl<K: Eq + Hash, V> Stripe<K, V> {
    /// Get a value from the stripe
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.map.read().get(key).cloned()
    }

    /// Check if a key exists
    pub fn contains_key(&self, key: &K) -> bool {
        self.map.read().contains_key(key)
    }

    /// Insert a value, returning the old value if present. `size_of`
    /// resolves the accounted size of a displaced value so replacement
    /// keeps the byte count exact.
    pub fn insert(
        &self,
        key: K,
        value: V,
        value_size: u64,
        size_of: impl FnOnce(&V) -> u64,
    ) -> Option<V> {
        let mut guard = self.map.write();
        let old = guard.insert(key, value);

        match &old {
            Some(old_value) => {
                let old_size = size_of(old_value);
                if value_size >= old_size {
                    self.size_bytes
                        .fetch_add(value_size - old_size, Ordering::Relaxed);
                } else {
                    self.size_bytes
                        .fetch_sub(old_size - value_size, Ordering::Relaxed);
                }
            }
            None => {
                self.count.fetch_add(1, Ordering::Relaxed);
                self.size_bytes.fetch_add(value_size, Ordering::Relaxed);
            }
        }

        old
    }

    /// Remove a value, returning it if present
    pub fn remove(&self, key: &K, value_size: u64) -> Option<V> {
        let mut guard = self.map.write();
        let removed = guard.remove(key);

        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
            self.size_bytes.fetch_sub(value_size, Ordering::Relaxed);
        }

        removed
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.map.write().clear();
        self.count.store(0, Ordering::Relaxed);
        self.size_bytes.store(0, Ordering::Relaxed);
    }

    /// Snapshot all keys
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.map.read().keys().cloned().collect()
    }

    /// Snapshot all entries
    pub fn entries(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Lock-striped map with a const stripe count
pub struct StripedMap<K, V, const N: usize = 256> {
    stripes: Box<[Stripe<K, V>; N]>,
}

impl<K, V, const N: usize> Default for StripedMap<K, V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, const N: usize> StripedMap<K, V, N> {
    /// Create a new striped map
    pub fn new() -> Self {
        assert!(N.is_power_of_two(), "stripe count must be a power of two");
        // Build via Vec to avoid a large stack temporary
        let stripes: Vec<Stripe<K, V>> = (0..N).map(|_| Stripe::new()).collect();
        let boxed: Box<[Stripe<K, V>; N]> = stripes.into_boxed_slice().try_into().ok().unwrap();
        Self { stripes: boxed }
    }

    /// Stripe count
    #[inline]
    pub const fn stripe_count(&self) -> usize {
        N
    }

    /// Total number of entries across all stripes
    pub fn len(&self) -> usize {
        self.stripes.iter().map(|s| s.len()).sum()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.stripes.iter().all(|s| s.is_empty())
    }

    /// Total size in bytes across all stripes
    pub fn size_bytes(&self) -> u64 {
        self.stripes.iter().map(|s| s.size_bytes()).sum()
    }

    /// Reference to a specific stripe
    #[inline]
    pub fn stripe(&self, index: usize) -> &Stripe<K, V> {
        &self.stripes[index & (N - 1)]
    }
}

impl<K: Eq + Hash, V, const N: usize> StripedMap<K, V, N> {
    #[inline]
    fn stripe_index(&self, key: &K) -> usize {
        use std::hash::Hasher;
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (N - 1)
    }

    /// Get a value
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.stripes[self.stripe_index(key)].get(key)
    }

    /// Check if a key exists
    pub fn contains_key(&self, key: &K) -> bool {
        self.stripes[self.stripe_index(key)].contains_key(key)
    }

    /// Insert a value
    pub fn insert(
        &self,
        key: K,
        value: V,
        value_size: u64,
        size_of: impl FnOnce(&V) -> u64,
    ) -> Option<V> {
        let idx = self.stripe_index(&key);
        self.stripes[idx].insert(key, value, value_size, size_of)
    }

    /// Remove a value
    pub fn remove(&self, key: &K, value_size: u64) -> Option<V> {
        self.stripes[self.stripe_index(key)].remove(key, value_size)
    }

    /// Clear all stripes
    pub fn clear(&self) {
        for stripe in self.stripes.iter() {
            stripe.clear();
        }
    }

    /// Snapshot all keys across stripes
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.stripes.iter().flat_map(|s| s.keys()).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
