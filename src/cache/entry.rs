use crate::core::Result;
use futures::future::{BoxFuture, Shared};
use std::time::Duration;
use tokio::time::Instant;

/// A cached value with its freshness bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub cached_at: Instant,
    /// `None` means the entry lives until it is invalidated.
    pub ttl: Option<Duration>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Option<Duration>) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.cached_at)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.ttl.is_some_and(|ttl| self.age(now) > ttl)
    }
}

pub(crate) type SharedFetch<T> = Shared<BoxFuture<'static, Result<Option<T>>>>;

/// An in-flight fetch that every caller for the same key awaits.
pub(crate) struct PendingRequest<T> {
    pub request_id: u64,
    pub future: SharedFetch<T>,
}
