//! Short-lived lookup cache.
//!
//! [`TtlCache::get_or_fetch`] is not single-flight: concurrent misses on the
//! same key may each run the fetch. The last successful fetch wins and no
//! entry is ever half-written.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// TTL applied by [`TtlCache::new`].
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Reader/writer-locked map whose entries expire a fixed time after insertion.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl<K, V> TtlCache<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Returns the cached value for `key` if it has not expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.is_fresh(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    /// Returns the fresh cached value, or runs `fetch` and caches its result.
    ///
    /// Failed fetches are returned as-is and leave the cache untouched.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce(&K) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            #[cfg(feature = "tracing")]
            tracing::trace!("cache hit");
            return Ok(value);
        }

        // No re-check after taking the write lock: a value stored by a
        // concurrent miss is overwritten by this fetch.
        let mut entries = self.entries.write().await;
        #[cfg(feature = "tracing")]
        tracing::debug!(ttl = ?self.ttl, "cache miss, fetching");

        let value = fetch(&key).await?;
        entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(value)
    }

    /// Stores `value` under `key`, replacing any previous entry.
    pub async fn insert(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries
            .write()
            .await
            .insert(key, CacheEntry { value, expires_at });
    }

    /// Drops the entry for `key`, returning its value if it was still fresh.
    pub async fn invalidate(&self, key: &K) -> Option<V> {
        self.entries
            .write()
            .await
            .remove(key)
            .filter(|entry| entry.is_fresh(Instant::now()))
            .map(|entry| entry.value)
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Removes expired entries and returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
