//! Positive/negative split-result cache.
//!
//! Results are classified by the caller's fetch: a positive ("allowed")
//! result lands in a long-lived backend, a negative ("denied") one in a
//! short-lived backend so denials are revalidated quickly. Both backends sit
//! behind one in-flight map, since a key cannot be classified both ways while
//! its fetch is outstanding.
//!
//! # Invalidation
//!
//! [`SplitResultCache::invalidate`] drops the key's in-flight registration
//! before deleting from either backend. A fetch that was already running then
//! either skips its write, or (if the invalidation landed while it was
//! writing) deletes what it wrote. A result computed before the invalidation
//! can never repopulate the cache afterwards.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warden_core::{
    CacheKey, FetchError, Keyable, SplitCacheConfig, StorageError, WardenError, WardenResult,
};
use warden_storage::{memory_factory, StorageBackend, StorageFactory};

use crate::inflight::{catch_fetch, spawn_fetch, InflightRegistry};
use crate::stats::{CacheMetrics, CacheStats};

/// A classified lookup result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheResult<V> {
    pub value: V,
    /// Set on results answered from a backend rather than a fresh fetch.
    pub cache_hit: bool,
    /// Decided by the fetch; selects the backend the result is stored in.
    pub is_positive: bool,
}

impl<V> CacheResult<V> {
    pub fn new(value: V, is_positive: bool) -> Self {
        Self {
            value,
            cache_hit: false,
            is_positive,
        }
    }

    pub fn positive(value: V) -> Self {
        Self::new(value, true)
    }

    pub fn negative(value: V) -> Self {
        Self::new(value, false)
    }

    fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }
}

type ResultBackend<V> = Arc<dyn StorageBackend<CacheResult<V>>>;

struct SplitInner<V> {
    positive: ResultBackend<V>,
    negative: ResultBackend<V>,
    inflight: InflightRegistry<CacheResult<V>>,
    metrics: CacheMetrics,
    config: SplitCacheConfig,
}

/// Cache partitioning results into independently expiring positive and
/// negative backends.
pub struct SplitResultCache<V> {
    inner: Arc<SplitInner<V>>,
}

impl<V> Clone for SplitResultCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> SplitResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache over two in-memory backends.
    pub fn new(config: SplitCacheConfig) -> Self {
        Self::with_factory(config, &memory_factory())
    }

    /// Create a cache whose backends are built by `factory`.
    ///
    /// The positive and negative backends get the `:pos` and `:neg` key
    /// postfixes, so both may live in one durable namespace.
    pub fn with_factory(config: SplitCacheConfig, factory: &StorageFactory<CacheResult<V>>) -> Self {
        let positive = factory(config.positive_storage());
        let negative = factory(config.negative_storage());
        Self {
            inner: Arc::new(SplitInner {
                positive,
                negative,
                inflight: InflightRegistry::default(),
                metrics: CacheMetrics::default(),
                config,
            }),
        }
    }

    /// Return the cached result for `request`, calling `on_miss` on a true miss.
    pub async fn execute_using_cache<K, F, Fut, E>(
        &self,
        request: K,
        on_miss: F,
    ) -> WardenResult<CacheResult<V>>
    where
        K: Keyable + Send + 'static,
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<CacheResult<V>, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let key = request.to_key();

        let inner = Arc::clone(&self.inner);
        let registration = self.inner.inflight.join_or_start(&key, |id| {
            tracing::debug!(key = %key, fetch_id = id, "Registered lookup");
            spawn_fetch(&key, inner.run_lookup(key.clone(), id, request, on_miss))
        });
        if registration.is_joined() {
            tracing::debug!(key = %key, "Joined lookup in flight");
            self.inner.metrics.coalesced();
        }

        registration.into_task().await
    }

    /// Peek at the cached result without fetching.
    pub async fn get<K: Keyable + ?Sized>(&self, request: &K) -> Option<CacheResult<V>> {
        self.inner.lookup(&request.to_key()).await
    }

    /// Forget everything known about `request`, including a fetch in flight.
    pub async fn invalidate<K: Keyable + ?Sized>(&self, request: &K) {
        let key = request.to_key();
        if self.inner.inflight.cancel(&key) {
            tracing::debug!(key = %key, "Cancelled lookup in flight");
        }
        // Classification may have changed since the entry was written.
        self.inner.negative.delete(&key).await;
        self.inner.positive.delete(&key).await;
        tracing::debug!(key = %key, "Invalidated");
    }

    /// Drop every in-flight registration and clear both backends.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let cancelled = self.inner.inflight.cancel_all();
        let positive = self.inner.positive.clear().await;
        let negative = self.inner.negative.clear().await;
        tracing::debug!(cancelled, "Cleared split cache");
        positive.and(negative)
    }

    pub fn pending_fetches(&self) -> usize {
        self.inner.inflight.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.metrics.snapshot()
    }

    pub fn config(&self) -> &SplitCacheConfig {
        &self.inner.config
    }
}

impl<V> SplitInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn backend_for(&self, is_positive: bool) -> &ResultBackend<V> {
        if is_positive {
            &self.positive
        } else {
            &self.negative
        }
    }

    /// Negative first, then positive. Hits are owned copies flagged as hits.
    async fn lookup(&self, key: &CacheKey) -> Option<CacheResult<V>> {
        if let Some(hit) = self.negative.get(key).await {
            return Some(hit.with_cache_hit(true));
        }
        self.positive
            .get(key)
            .await
            .map(|hit| hit.with_cache_hit(true))
    }

    async fn run_lookup<K, F, Fut, E>(
        self: Arc<Self>,
        key: CacheKey,
        id: u64,
        request: K,
        on_miss: F,
    ) -> WardenResult<CacheResult<V>>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<CacheResult<V>, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Some(hit) = self.lookup(&key).await {
            tracing::trace!(key = %key, is_positive = hit.is_positive, "Cache hit");
            self.inflight.complete(&key, id);
            self.metrics.hit();
            return Ok(hit);
        }
        tracing::trace!(key = %key, "Cache miss");
        self.metrics.miss();
        self.metrics.fetch();

        let outcome = catch_fetch(async move { on_miss(request).await }).await;
        match outcome {
            Ok(Ok(result)) => {
                let result = result.with_cache_hit(false);
                self.store(&key, id, &result).await;
                Ok(result)
            }
            Ok(Err(e)) => {
                self.inflight.complete(&key, id);
                self.metrics.fetch_error();
                tracing::debug!(key = %key, error = %e, "Lookup failed");
                Err(WardenError::Fetch {
                    key: key.into_string(),
                    source: FetchError::new(e),
                })
            }
            Err(reason) => {
                self.inflight.complete(&key, id);
                self.metrics.fetch_error();
                tracing::warn!(key = %key, reason = %reason, "Lookup panicked");
                Err(WardenError::FetchAborted {
                    key: key.into_string(),
                    reason,
                })
            }
        }
    }

    /// Write a fresh result unless the key was invalidated meanwhile.
    async fn store(&self, key: &CacheKey, id: u64, result: &CacheResult<V>) {
        if !self.inflight.is_current(key, id) {
            tracing::debug!(key = %key, "Invalidated during lookup, result not stored");
            return;
        }

        let backend = self.backend_for(result.is_positive);
        backend.set(key, result.clone(), None).await;

        if !self.inflight.complete(key, id) {
            tracing::debug!(key = %key, "Invalidated during write, removing result");
            backend.delete(key).await;
        }
    }
}
