// ============================================================================
// Cache Manager
// ============================================================================
//
// Per-key TTL cache with in-flight request deduplication.
//
// - Live entries are served without touching the remote collaborator.
// - At most one fetch per key is in flight; every concurrent caller awaits
//   the same shared future.
// - Fetches run on their own task, so a caller that stops waiting never
//   cancels the request for the others.
// - Invalidation drops the entry and the pending bookkeeping under one lock;
//   a fetch that settles afterwards is handed to its waiters but not cached.
//
// ============================================================================

use super::entry::{CacheEntry, PendingRequest, SharedFetch};
use crate::core::{CacheKey, RemoteErrorKind, Result, SyncError};
use futures::FutureExt;
use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{Level, event};

struct CacheTable<T> {
    entries: LruCache<CacheKey, CacheEntry<T>>,
    pending: HashMap<CacheKey, PendingRequest<T>>,
}

impl<T: Clone> CacheTable<T> {
    /// Returns the live value for `key`, evicting it first if it expired.
    ///
    /// `promote` controls whether the lookup refreshes the LRU position.
    fn live_value(&mut self, key: &CacheKey, now: Instant, promote: bool) -> Lookup<T> {
        let expired = match self.entries.peek(key) {
            Some(entry) => entry.is_expired(now),
            None => return Lookup::Missing,
        };

        if expired {
            self.entries.pop(key);
            return Lookup::Expired;
        }

        let entry = if promote {
            self.entries.get(key)
        } else {
            self.entries.peek(key)
        };
        match entry {
            Some(entry) => Lookup::Live(entry.value.clone()),
            None => Lookup::Missing,
        }
    }
}

enum Lookup<T> {
    Live(T),
    Expired,
    Missing,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    fetches: AtomicU64,
    expirations: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that awaited an already in-flight fetch
    pub joins: u64,
    /// Remote fetches actually started
    pub fetches: u64,
    pub expirations: u64,
    pub entries: usize,
    pub pending: usize,
}

pub struct CacheManager<T> {
    name: &'static str,
    table: Arc<Mutex<CacheTable<T>>>,
    ttl: Option<Duration>,
    counters: Arc<CacheCounters>,
    next_request_id: AtomicU64,
}

impl<T> CacheManager<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a cache named `name` (used in log events) holding at most
    /// `capacity` entries, each living for `ttl` (`None`: until invalidated).
    pub fn new(name: &'static str, ttl: Option<Duration>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            table: Arc::new(Mutex::new(CacheTable {
                entries: LruCache::new(capacity),
                pending: HashMap::new(),
            })),
            ttl,
            counters: Arc::new(CacheCounters::default()),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Returns the value for `key`, fetching it through `fetch` when needed.
    ///
    /// `fetch` is only invoked when no live entry exists (or `force_refresh`
    /// is set) and no fetch for `key` is already in flight. `Ok(None)` from
    /// the fetch means "not found" and is not cached; errors are returned to
    /// every waiter and are not cached either.
    pub async fn get<F, Fut>(
        &self,
        key: &CacheKey,
        force_refresh: bool,
        fetch: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let shared = {
            let mut table = self.table.lock().await;

            if !force_refresh {
                match table.live_value(key, Instant::now(), true) {
                    Lookup::Live(value) => {
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        event!(Level::TRACE, cache = self.name, key = %key, "cache hit");
                        return Ok(Some(value));
                    }
                    Lookup::Expired => {
                        self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                        self.counters.misses.fetch_add(1, Ordering::Relaxed);
                        event!(Level::DEBUG, cache = self.name, key = %key, "cache entry expired");
                    }
                    Lookup::Missing => {
                        self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            if let Some(pending) = table.pending.get(key) {
                self.counters.joins.fetch_add(1, Ordering::Relaxed);
                event!(
                    Level::DEBUG,
                    cache = self.name,
                    key = %key,
                    request_id = pending.request_id,
                    "joined in-flight fetch"
                );
                pending.future.clone()
            } else {
                let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
                let future = self.spawn_fetch(key.clone(), request_id, fetch());
                table.pending.insert(
                    key.clone(),
                    PendingRequest {
                        request_id,
                        future: future.clone(),
                    },
                );
                future
            }
        };

        shared.await
    }

    fn spawn_fetch<Fut>(&self, key: CacheKey, request_id: u64, fetch: Fut) -> SharedFetch<T>
    where
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        event!(Level::DEBUG, cache = self.name, key = %key, request_id, "remote fetch started");

        let table = Arc::clone(&self.table);
        let ttl = self.ttl;
        let name = self.name;
        let handle = tokio::spawn(async move {
            let result = fetch.await;

            let mut table = table.lock().await;
            let still_current = table
                .pending
                .get(&key)
                .is_some_and(|pending| pending.request_id == request_id);

            if !still_current {
                event!(
                    Level::DEBUG,
                    cache = name,
                    key = %key,
                    request_id,
                    "fetch settled after invalidation, result not cached"
                );
                return result;
            }

            table.pending.remove(&key);
            match &result {
                Ok(Some(value)) => {
                    table
                        .entries
                        .put(key.clone(), CacheEntry::new(value.clone(), ttl));
                }
                Ok(None) => {
                    event!(Level::DEBUG, cache = name, key = %key, "remote returned no value");
                }
                Err(err) => {
                    event!(
                        Level::WARN,
                        cache = name,
                        key = %key,
                        error = %err,
                        "remote fetch failed"
                    );
                }
            }
            result
        });

        async move {
            handle.await.unwrap_or_else(|err| {
                Err(SyncError::remote(
                    RemoteErrorKind::Aborted,
                    format!("fetch task failed: {err}"),
                ))
            })
        }
        .boxed()
        .shared()
    }

    /// Stores `value` as the current entry for `key`.
    ///
    /// A fetch in flight for `key` keeps serving its waiters but no longer
    /// overwrites the published value when it settles.
    pub async fn put(&self, key: CacheKey, value: T) {
        let mut table = self.table.lock().await;
        table.pending.remove(&key);
        table.entries.put(key, CacheEntry::new(value, self.ttl));
    }

    /// Returns the live value for `key` without fetching and without
    /// refreshing its LRU position. Expired entries are evicted.
    pub async fn peek(&self, key: &CacheKey) -> Option<T> {
        let mut table = self.table.lock().await;
        match table.live_value(key, Instant::now(), false) {
            Lookup::Live(value) => Some(value),
            Lookup::Expired => {
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                None
            }
            Lookup::Missing => None,
        }
    }

    /// Removes the entry and any pending-request bookkeeping for `key`.
    ///
    /// Returns `true` if anything was removed.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        let mut table = self.table.lock().await;
        let had_entry = table.entries.pop(key).is_some();
        let had_pending = table.pending.remove(key).is_some();
        if had_entry || had_pending {
            event!(Level::DEBUG, cache = self.name, key = %key, "cache key invalidated");
        }
        had_entry || had_pending
    }

    /// Clears the whole table.
    pub async fn invalidate_all(&self) {
        let mut table = self.table.lock().await;
        let cleared = table.entries.len();
        table.entries.clear();
        table.pending.clear();
        event!(Level::DEBUG, cache = self.name, cleared, "cache cleared");
    }

    /// Drops every entry owned by `owner_id`.
    pub async fn invalidate_owner(&self, owner_id: &str) {
        let mut table = self.table.lock().await;
        let keys: Vec<CacheKey> = table
            .entries
            .iter()
            .filter(|(key, _)| key.owner_id == owner_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            table.entries.pop(key);
        }
        table.pending.retain(|key, _| key.owner_id != owner_id);
        event!(
            Level::DEBUG,
            cache = self.name,
            owner_id,
            removed = keys.len(),
            "owner entries invalidated"
        );
    }

    pub async fn has_pending(&self, key: &CacheKey) -> bool {
        self.table.lock().await.pending.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let table = self.table.lock().await;
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            joins: self.counters.joins.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            entries: table.entries.len(),
            pending: table.pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: &'static str,
    ) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<Option<String>>> + use<> {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Some(value.to_string()))
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_skips_remote() {
        let cache = CacheManager::new("test", Some(Duration::from_secs(60)), 8);
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::profile("u1");

        let first = cache.get(&key, false, counting_fetch(&calls, "a")).await.unwrap();
        let second = cache.get(&key, false, counting_fetch(&calls, "b")).await.unwrap();

        assert_eq!(first.as_deref(), Some("a"));
        assert_eq!(second.as_deref(), Some("a"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.fetches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_refetches() {
        let cache = CacheManager::new("test", Some(Duration::from_secs(60)), 8);
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::profile("u1");

        cache.get(&key, false, counting_fetch(&calls, "a")).await.unwrap();
        let refreshed = cache.get(&key, true, counting_fetch(&calls, "b")).await.unwrap();

        assert_eq!(refreshed.as_deref(), Some("b"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.peek(&key).await.as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_and_not_found_are_not_cached() {
        let cache: CacheManager<String> = CacheManager::new("test", None, 8);
        let key = CacheKey::avatar("u1");

        let err = cache
            .get(&key, false, || async { Err(SyncError::network("down")) })
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::network("down"));
        assert!(cache.is_empty().await);

        let missing = cache.get(&key, false, || async { Ok(None) }).await.unwrap();
        assert_eq!(missing, None);
        assert!(cache.is_empty().await);
        assert!(!cache.has_pending(&key).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_during_fetch_does_not_repopulate() {
        let cache = Arc::new(CacheManager::new("test", None, 8));
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::profile("u1");

        let waiter = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            let fetch = counting_fetch(&calls, "stale");
            tokio::spawn(async move { cache.get(&key, false, fetch).await })
        };

        tokio::task::yield_now().await;
        assert!(cache.has_pending(&key).await);
        assert!(cache.invalidate(&key).await);

        let value = waiter.await.unwrap().unwrap();
        assert_eq!(value.as_deref(), Some("stale"));
        assert_eq!(cache.peek(&key).await, None);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let cache = CacheManager::new("test", None, 2);
        cache.put(CacheKey::profile("a"), 1).await;
        cache.put(CacheKey::profile("b"), 2).await;
        cache.put(CacheKey::profile("c"), 3).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.peek(&CacheKey::profile("a")).await, None);
        assert_eq!(cache.peek(&CacheKey::profile("c")).await, Some(3));
    }

    #[tokio::test]
    async fn test_invalidate_owner_only_drops_that_owner() {
        let cache = CacheManager::new("test", None, 8);
        cache.put(CacheKey::profile("a"), 1).await;
        cache.put(CacheKey::avatar("a"), 2).await;
        cache.put(CacheKey::profile("b"), 3).await;

        cache.invalidate_owner("a").await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.peek(&CacheKey::profile("b")).await, Some(3));
    }
}
