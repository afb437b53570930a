//! Tool-owned read-through cache.
//!
//! Orchestrations run concurrently and share nothing mutable except the
//! caches individual tools choose to own.  [`ToolCache`] wraps
//! [`moka::future::Cache`]: entries expire after a fixed time-to-live and the
//! cache holds at most `max_capacity` entries.
//!
//! Reads are idempotent: two lookups of the same key within the TTL observe
//! the same value.  Concurrent misses on one key share a single computation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

/// Entry bound used by [`ToolCache::new`].
pub const DEFAULT_MAX_CAPACITY: u64 = 10_000;

/// Concurrent TTL cache keyed by string.
///
/// Cheaply cloneable; clones share the same entries.
#[derive(Clone)]
pub struct ToolCache<V> {
    inner: Cache<String, V>,
    ttl: Duration,
}

impl<V> ToolCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache whose entries live for `ttl`, bounded by
    /// [`DEFAULT_MAX_CAPACITY`].
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_MAX_CAPACITY)
    }

    /// Create an empty cache holding at most `max_capacity` entries.
    #[must_use]
    pub fn with_capacity(ttl: Duration, max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { inner, ttl }
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `key` if present and fresh.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).await
    }

    /// Insert or replace the value for `key`.
    pub async fn insert(&self, key: impl Into<String>, value: V) {
        self.inner.insert(key.into(), value).await;
    }

    /// Return the cached value or compute, cache and return it.
    ///
    /// When several tasks miss on `key` at once only one `compute` runs;
    /// the others wait for its result.  Errors are returned to every waiter
    /// and nothing is cached for them.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Clone + Send + Sync + 'static,
    {
        self.inner
            .try_get_with_by_ref(key, compute())
            .await
            .map_err(|shared: Arc<E>| {
                tracing::trace!(key = %key, "cache fill failed");
                Arc::unwrap_or_clone(shared)
            })
    }

    /// Drop a single key.
    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }

    /// Number of live entries, after pending evictions have run.
    pub async fn len(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }

    /// Whether the cache holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<V> fmt::Debug for ToolCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
