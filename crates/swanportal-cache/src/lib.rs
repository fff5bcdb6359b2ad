//! In-process TTL cache.
//!
//! Every lookup layer in the portal (credential objects, directory
//! principals, compiled templates, redeemed tokens) shares this one cache
//! shape: a map guarded by a [`parking_lot::RwLock`] whose entries expire a
//! fixed duration after insertion.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use swanportal_cache::TtlCache;
//!
//! let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
//! cache.insert("a".to_string(), 1);
//! assert_eq!(cache.get(&"a".to_string()), Some(1));
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// A TTL cache with a fixed per-entry lifetime.
///
/// All entries expire `ttl` after insertion; a lookup past the deadline
/// behaves as a miss. Expired entries are dropped lazily on access and by
/// [`cleanup_expired`](Self::cleanup_expired).
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,

    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    /// Create a new cache whose entries live for `ttl` after insertion.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a value, returning `None` for absent or expired entries.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        if let Some(entry) = entries.get(key) {
            if Instant::now() < entry.expires_at {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        drop(entries);

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert a value, replacing any previous entry and restarting its TTL.
    pub fn insert(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().insert(key, entry);
    }

    /// Insert with an explicit lifetime instead of the cache default.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key, entry);
    }

    /// Atomically insert `value` unless a live entry already exists.
    ///
    /// Returns `true` when the value was inserted and `false` when a
    /// non-expired entry was already present. This is the one-shot
    /// primitive: two concurrent callers with the same key see exactly one
    /// `true` between them.
    pub fn insert_if_absent(&self, key: K, value: V, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(&key) {
            if now < entry.expires_at {
                return false;
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
        true
    }

    /// Remove an entry, returning its value if it was present and live.
    pub fn remove(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .write()
            .remove(key)
            .filter(|e| now < e.expires_at)
            .map(|e| e.value)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Drop entries past their deadline.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, e| e.expires_at > now);
    }

    /// Number of entries currently stored, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.read().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl: self.ttl,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of stored entries.
    pub size: usize,
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Entry lifetime.
    pub ttl: Duration,
}

impl CacheStats {
    /// Hit rate in the range 0.0 to 1.0.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
