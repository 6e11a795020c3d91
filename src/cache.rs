//! Response cache seam used by [`HttpClient::cached_call`](crate::HttpClient::cached_call).

use std::{
    fmt,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use moka::{future::Cache, Expiry};

use crate::Result;

/// Prefix of every response cache key.
pub const CACHE_KEY_PREFIX: &str = "apicaching:";

/// Entries a [`MemoryCache::new`] holds before evicting the least used.
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Cache key for a resolved URL.
pub fn cache_key(url: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{url}")
}

/// Key-value store holding raw response bodies.
///
/// Implementations own expiry: an entry must stop being returned once its TTL
/// has elapsed.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the stored value, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
}

#[derive(Clone, Debug)]
struct Entry {
    body: String,
    ttl: Duration,
}

/// Expires each entry after the TTL it was stored with.
struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _remaining: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process [`CacheStore`] backed by a `moka` cache with per-entry TTL.
///
/// Expired entries are reclaimed by the cache's own housekeeping whether or
/// not they are read again. Capacity is bounded; the least used entries are
/// evicted first.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, Entry>,
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.entry_count())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryTtl)
            .build();
        Self { entries }
    }

    /// Approximate number of live entries. Exact after [`MemoryCache::purge_expired`].
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Runs pending housekeeping now, dropping expired entries.
    pub async fn purge_expired(&self) {
        self.entries.run_pending_tasks().await;
    }

    pub async fn remove(&self, key: &str) {
        self.entries.invalidate(key).await;
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).await.map(|entry| entry.body))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_owned(), Entry { body: value, ttl })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{cache_key, CacheStore, MemoryCache};

    #[test]
    fn key_is_prefixed_url() {
        assert_eq!(
            cache_key("http://svc/users/1"),
            "apicaching:http://svc/users/1"
        );
    }

    #[tokio::test]
    async fn returns_value_within_ttl() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".to_owned(), Duration::from_secs(60))
            .await
            .expect("set must succeed");
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_ttl_entry_is_a_miss() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".to_owned(), Duration::ZERO)
            .await
            .expect("set must succeed");
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn overwrite_takes_the_new_ttl() {
        let cache = MemoryCache::new();
        cache.set("k", "old".to_owned(), Duration::ZERO).await.unwrap();
        cache
            .set("k", "new".to_owned(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn unread_expired_entries_are_reclaimed() {
        let cache = MemoryCache::new();
        for i in 0..50 {
            let key = cache_key(&format!("http://svc/items/{i}"));
            cache
                .set(&key, "{}".to_owned(), Duration::from_millis(50))
                .await
                .unwrap();
        }
        cache
            .set("kept", "1".to_owned(), Duration::from_secs(60))
            .await
            .unwrap();
        cache.purge_expired().await;
        assert_eq!(cache.entry_count(), 51);

        tokio::time::sleep(Duration::from_millis(200)).await;
        cache.purge_expired().await;
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.get("kept").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn capacity_is_bounded() {
        let cache = MemoryCache::with_max_entries(10);
        for i in 0..100 {
            cache
                .set(&format!("k{i}"), "v".to_owned(), Duration::from_secs(60))
                .await
                .unwrap();
        }
        cache.purge_expired().await;
        assert!(cache.entry_count() <= 10);
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".to_owned(), Duration::from_secs(60))
            .await
            .unwrap();
        cache.remove("k").await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
