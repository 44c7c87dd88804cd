//! TTL key-value storage.
//!
//! [`TransientStore`] is a process-local key-value store with per-entry
//! expiry. It is shared: page bodies live next to short-lived flags such as
//! the rewrite-check marker. [`TtlStore`] is the page cache's view of it and
//! confines itself to keys under its namespace prefix.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::debug;

use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::store::{StorageBackend, StorageError};

const SOURCE: &str = "cache::transient";
const METRIC_EVICT_TOTAL: &str = "pagecache_evict_total";

/// One stored value with its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub body: Bytes,
    pub stored_at: OffsetDateTime,
    pub ttl: Option<Duration>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    /// A ttl too large to represent as a deadline never expires.
    fn new(body: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            body,
            stored_at: OffsetDateTime::now_utc(),
            ttl,
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    /// Whether the entry has outlived its ttl.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }

    /// Time left before expiry; `None` for entries without a ttl.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now()))
    }
}

/// Bounded key-value store with read-through expiry.
///
/// Expired entries are dropped when they are next looked at; there is no
/// background sweep. When full, the least recently used entry is evicted.
pub struct TransientStore {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl TransientStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.entry(key).map(|entry| entry.body)
    }

    /// Look up the full entry, dropping it if it has expired.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "entry");
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.pop(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Store a value, overwriting any previous one under the same key.
    ///
    /// Returns the key evicted to make room, if any.
    pub fn set(&self, key: impl Into<String>, value: Bytes, ttl: Option<Duration>) -> Option<String> {
        let key = key.into();
        let evicted = mutex_lock(&self.entries, SOURCE, "set")
            .push(key.clone(), CacheEntry::new(value, ttl))
            .map(|(evicted_key, _)| evicted_key)
            .filter(|evicted_key| *evicted_key != key);

        if let Some(evicted_key) = &evicted {
            counter!(METRIC_EVICT_TOTAL, "reason" => "capacity").increment(1);
            debug!(cache = "transient", evicted = %evicted_key, "evicted entry at capacity");
        }
        evicted
    }

    /// Remove a key. Returns whether a live entry was removed.
    pub fn remove(&self, key: &str) -> bool {
        mutex_lock(&self.entries, SOURCE, "remove")
            .pop(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Remove every key starting with `prefix`, returning how many were removed.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = mutex_lock(&self.entries, SOURCE, "remove_prefix");
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    /// Count unexpired keys starting with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        mutex_lock(&self.entries, SOURCE, "count_prefix")
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired())
            .count()
    }

    /// Total number of stored keys, including ones not yet found expired.
    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Page store backed by a namespaced slice of a [`TransientStore`].
pub struct TtlStore {
    store: Arc<TransientStore>,
    namespace: String,
    default_ttl: Duration,
}

impl TtlStore {
    pub fn new(store: Arc<TransientStore>, namespace: impl Into<String>, default_ttl: Duration) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            default_ttl,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn storage_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.namespace, key.digest())
    }
}

#[async_trait]
impl StorageBackend for TtlStore {
    fn name(&self) -> &'static str {
        "transient"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StorageError> {
        Ok(self.store.get(&self.storage_key(key)))
    }

    async fn put(
        &self,
        key: &CacheKey,
        body: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.store.set(self.storage_key(key), body, Some(ttl));
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), StorageError> {
        self.store.remove(&self.storage_key(key));
        Ok(())
    }

    async fn purge_all(&self) -> Result<(), StorageError> {
        let removed = self.store.remove_prefix(&self.namespace);
        debug!(cache = "transient", removed, namespace = %self.namespace, "purged namespace");
        Ok(())
    }

    fn entry_count(&self) -> Option<usize> {
        Some(self.store.count_prefix(&self.namespace))
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::cache::keys::derive_key;

    const TWELVE_HOURS: Duration = Duration::from_secs(12 * 60 * 60);

    fn shared_store(capacity: usize) -> Arc<TransientStore> {
        Arc::new(TransientStore::new(
            NonZeroUsize::new(capacity).expect("non-zero capacity"),
        ))
    }

    fn ttl_store() -> TtlStore {
        TtlStore::new(shared_store(64), "page_cache_", TWELVE_HOURS)
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let store = ttl_store();
        let key = derive_key("/hello");

        assert!(store.get(&key).await.expect("get").is_none());
        store
            .put(&key, Bytes::from_static(b"<html>hi</html>"), None)
            .await
            .expect("put");

        let body = store.get(&key).await.expect("get").expect("stored body");
        assert_eq!(body, Bytes::from_static(b"<html>hi</html>"));
    }

    #[tokio::test]
    async fn put_overwrites_previous_body() {
        let store = ttl_store();
        let key = derive_key("/hello");

        store.put(&key, Bytes::from_static(b"one"), None).await.expect("put");
        store.put(&key, Bytes::from_static(b"two"), None).await.expect("put");

        assert_eq!(
            store.get(&key).await.expect("get"),
            Some(Bytes::from_static(b"two"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = ttl_store();
        let key = derive_key("/short-lived");

        store
            .put(&key, Bytes::from_static(b"body"), Some(Duration::from_secs(1)))
            .await
            .expect("put");
        assert!(store.get(&key).await.expect("get").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(store.get(&key).await.expect("get").is_none());
        assert_eq!(store.entry_count(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn default_ttl_is_applied() {
        let store = ttl_store();
        let key = derive_key("/default");

        store.put(&key, Bytes::from_static(b"body"), None).await.expect("put");

        tokio::time::advance(TWELVE_HOURS - Duration::from_secs(1)).await;
        assert!(store.get(&key).await.expect("get").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get(&key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn unrepresentable_ttl_never_expires() {
        let shared = shared_store(4);
        shared.set("flag", Bytes::from_static(b"1"), Some(Duration::MAX));
        shared.set("secs", Bytes::from_static(b"2"), Some(Duration::from_secs(u64::MAX)));

        let entry = shared.entry("flag").expect("stored entry");
        assert!(!entry.is_expired());
        assert_eq!(entry.remaining(), None);
        assert_eq!(shared.get("secs"), Some(Bytes::from_static(b"2")));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = ttl_store();
        let key = derive_key("/gone");

        store.put(&key, Bytes::from_static(b"body"), None).await.expect("put");
        store.delete(&key).await.expect("first delete");
        store.delete(&key).await.expect("second delete");
        assert!(store.get(&key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn purge_only_touches_namespace() {
        let shared = shared_store(64);
        let store = TtlStore::new(shared.clone(), "page_cache_", TWELVE_HOURS);
        shared.set("unrelated_flag", Bytes::from_static(b"1"), None);

        let paths = ["/", "/a", "/b/c"];
        for path in paths {
            store
                .put(&derive_key(path), Bytes::from(path.to_string()), None)
                .await
                .expect("put");
        }
        assert_eq!(store.entry_count(), Some(3));

        store.purge_all().await.expect("purge");

        for path in paths {
            assert!(store.get(&derive_key(path)).await.expect("get").is_none());
        }
        assert_eq!(shared.get("unrelated_flag"), Some(Bytes::from_static(b"1")));
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let shared = shared_store(2);
        assert!(shared.set("a", Bytes::from_static(b"a"), None).is_none());
        assert!(shared.set("b", Bytes::from_static(b"b"), None).is_none());

        assert_eq!(shared.set("c", Bytes::from_static(b"c"), None), Some("a".to_string()));
        assert!(shared.get("a").is_none());
        assert!(shared.get("c").is_some());
    }

    #[test]
    fn overwrite_at_capacity_is_not_an_eviction() {
        let shared = shared_store(1);
        shared.set("a", Bytes::from_static(b"1"), None);
        assert!(shared.set("a", Bytes::from_static(b"2"), None).is_none());
        assert_eq!(shared.get("a"), Some(Bytes::from_static(b"2")));
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let shared = shared_store(4);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = shared.entries.lock().expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        shared.set("after", Bytes::from_static(b"ok"), None);
        assert_eq!(shared.get("after"), Some(Bytes::from_static(b"ok")));
    }
}
