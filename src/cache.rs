//! Bounded-lifetime cache for upstream reads.
//!
//! Every accessor that talks to a JSON-RPC node or a third-party HTTP API
//! consults a [`TtlCache`] first. Entries expire lazily on read; an optional
//! sweeper only bounds memory for keys that are written once and never read
//! again.

use crate::error::Result;
use crate::maintenance::PeriodicTask;
use lru::LruCache;
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default cache capacity.
const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// A cached value with its expiry instant.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value.
    pub value: V,
    /// Instant at (and after) which the entry reads as absent.
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (including expired entries).
    pub misses: u64,
    /// Number of entries written.
    pub additions: u64,
    /// Number of entries dropped because they expired.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Capacity-bounded map with a fixed per-instance time-to-live.
///
/// Cloning is cheap and shares the underlying entries, so one instance can be
/// handed to many concurrent requests. A `set` from one request may satisfy a
/// `get` from another.
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    inner: Arc<Mutex<LruCache<K, CacheEntry<V>>>>,
    stats: Arc<Mutex<CacheStats>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            ttl: self.ttl,
            inner: Arc::clone(&self.inner),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("len", &self.inner.lock().len())
            .finish()
    }
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    /// Create a new cache with default capacity.
    #[must_use]
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self::with_capacity(name, ttl, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a new cache with the specified capacity.
    #[must_use]
    pub fn with_capacity(name: &'static str, ttl: Duration, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            ttl,
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
            stats: Arc::new(Mutex::new(CacheStats::default())),
        }
    }

    /// Look up a live entry.
    ///
    /// An entry whose expiry has been reached reads as absent and is removed.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let mut cache = self.inner.lock();

        let (value, expired) = match cache.get(key) {
            Some(entry) if entry.is_expired(now) => (None, true),
            Some(entry) => (Some(entry.value.clone()), false),
            None => (None, false),
        };
        if expired {
            cache.pop(key);
        }
        drop(cache);

        let mut stats = self.stats.lock();
        if value.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        if expired {
            stats.expirations += 1;
        }

        value
    }

    /// Insert or overwrite an entry, resetting its expiry to `now + ttl`.
    pub fn set(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.inner.lock().put(key, entry);
        self.stats.lock().additions += 1;
    }

    /// Return the cached value or run `fetch` and cache its result.
    ///
    /// Errors from `fetch` are returned and nothing is cached. The lock is not
    /// held while `fetch` runs, so concurrent misses may both fetch; the last
    /// write wins.
    ///
    /// # Errors
    ///
    /// Returns whatever error `fetch` produces.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = fetch().await?;
        self.set(key, value.clone());
        Ok(value)
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// The configured time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache name used in logs and events.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.inner.lock();
        let expired: Vec<K> = cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            cache.pop(key);
        }
        drop(cache);

        if !expired.is_empty() {
            self.stats.lock().expirations += expired.len() as u64;
            debug!("Cache '{}' swept {} expired entries", self.name, expired.len());
        }
        expired.len()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Start a sweeper that purges expired entries every `interval`.
    ///
    /// Reads stay correct whether or not the sweeper runs.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration) -> PeriodicTask {
        let cache = self.clone();
        PeriodicTask::spawn(self.name, interval, move || {
            cache.purge_expired();
        })
    }
}
