//! Single-flight coalescing cache.
//!
//! [`CoalescingCache::execute_using_cache`] answers from the backend when it
//! can, and otherwise makes sure at most one fetch per key is running: every
//! caller that misses while a fetch is in flight waits on that same fetch and
//! receives the identical value or error.
//!
//! Fetches run on their own tokio task, so a fetch always completes (and its
//! result is written back) even if every caller has stopped waiting. The
//! cache must be used from within a tokio runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use warden_core::{CacheKey, FetchError, Keyable, StorageConfig, StorageError, WardenError, WardenResult};
use warden_storage::{memory_factory, StorageBackend, StorageFactory};

use crate::inflight::{catch_fetch, spawn_fetch, InflightRegistry};
use crate::stats::{CacheMetrics, CacheStats};

/// Per-call options for [`CoalescingCache::execute_using_cache_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Bypass the backend read and go straight to the (coalesced) fetch.
    /// The fresh result is still written back.
    pub skip_cache: bool,
}

impl ExecuteOptions {
    pub fn skip_cache() -> Self {
        Self { skip_cache: true }
    }
}

struct CacheInner<V> {
    backend: Arc<dyn StorageBackend<V>>,
    inflight: InflightRegistry<V>,
    metrics: CacheMetrics,
}

/// Generic `key -> value` cache with single-flight misses.
///
/// Cloning is cheap and clones share the same backend and in-flight map.
pub struct CoalescingCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for CoalescingCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> CoalescingCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache over the default in-memory backend.
    pub fn new(config: StorageConfig) -> Self {
        Self::with_factory(config, &memory_factory())
    }

    /// Create a cache over a backend built by `factory`.
    pub fn with_factory(config: StorageConfig, factory: &StorageFactory<V>) -> Self {
        Self::with_backend(factory(config))
    }

    pub fn with_backend(backend: Arc<dyn StorageBackend<V>>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                backend,
                inflight: InflightRegistry::default(),
                metrics: CacheMetrics::default(),
            }),
        }
    }

    /// Return the cached value for `request`, fetching it on a miss.
    pub async fn execute_using_cache<K, F, Fut, E>(&self, request: K, fetch: F) -> WardenResult<V>
    where
        K: Keyable + Send + 'static,
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_using_cache_with(request, fetch, ExecuteOptions::default())
            .await
    }

    /// [`execute_using_cache`](Self::execute_using_cache) with per-call options.
    pub async fn execute_using_cache_with<K, F, Fut, E>(
        &self,
        request: K,
        fetch: F,
        options: ExecuteOptions,
    ) -> WardenResult<V>
    where
        K: Keyable + Send + 'static,
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let key = request.to_key();

        if !options.skip_cache {
            if let Some(value) = self.inner.backend.get(&key).await {
                tracing::trace!(key = %key, "Cache hit");
                self.inner.metrics.hit();
                return Ok(value);
            }
            tracing::trace!(key = %key, "Cache miss");
            self.inner.metrics.miss();
        }

        let inner = Arc::clone(&self.inner);
        let registration = self.inner.inflight.join_or_start(&key, |id| {
            tracing::debug!(key = %key, fetch_id = id, "Registered fetch");
            spawn_fetch(&key, inner.run_fetch(key.clone(), id, request, fetch))
        });
        if registration.is_joined() {
            tracing::debug!(key = %key, "Joined fetch in flight");
            self.inner.metrics.coalesced();
        }

        registration.into_task().await
    }

    /// Read the backend directly, without fetching.
    pub async fn get<K: Keyable + ?Sized>(&self, request: &K) -> Option<V> {
        self.inner.backend.get(&request.to_key()).await
    }

    /// Write a value directly to the backend.
    pub async fn add<K: Keyable + ?Sized>(&self, request: &K, value: V, ttl: Option<Duration>) {
        self.inner.backend.set(&request.to_key(), value, ttl).await;
    }

    /// Delete a value from the backend. Fetches in flight are unaffected.
    pub async fn remove<K: Keyable + ?Sized>(&self, request: &K) {
        self.inner.backend.delete(&request.to_key()).await;
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.inner.backend.clear().await
    }

    /// Number of fetches currently in flight.
    pub fn pending_fetches(&self) -> usize {
        self.inner.inflight.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.metrics.snapshot()
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend<V>> {
        &self.inner.backend
    }
}

impl<V> CacheInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn run_fetch<K, F, Fut, E>(
        self: Arc<Self>,
        key: CacheKey,
        id: u64,
        request: K,
        fetch: F,
    ) -> WardenResult<V>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.metrics.fetch();
        let outcome = catch_fetch(async move { fetch(request).await }).await;

        match outcome {
            Ok(Ok(value)) => {
                self.backend.set(&key, value.clone(), None).await;
                self.inflight.complete(&key, id);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.inflight.complete(&key, id);
                self.metrics.fetch_error();
                tracing::debug!(key = %key, error = %e, "Fetch failed");
                Err(WardenError::Fetch {
                    key: key.into_string(),
                    source: FetchError::new(e),
                })
            }
            Err(reason) => {
                self.inflight.complete(&key, id);
                self.metrics.fetch_error();
                tracing::warn!(key = %key, reason = %reason, "Fetch panicked");
                Err(WardenError::FetchAborted {
                    key: key.into_string(),
                    reason,
                })
            }
        }
    }
}
