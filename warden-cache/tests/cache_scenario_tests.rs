//! End-to-end cache behavior tests.
//!
//! Covers single-flight coalescing, TTL expiry, race-safe invalidation,
//! independent positive/negative expiry, and the durable backend's own
//! expiry check running underneath a cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::{oneshot, Notify};
use warden_cache::{CacheResult, CoalescingCache, SplitResultCache};
use warden_core::{DurableOptions, SplitCacheConfig, StorageConfig, StorageError};
use warden_storage::{DurableStorage, KeyValueStore, MemoryKvStore, PutOptions};
use warden_test_utils::assertions::assert_fetch_error;
use warden_test_utils::fixtures::{fast_split_config, read_request};
use warden_test_utils::{
    CountingKvStore, EntitlementRequest, FailingKvStore, FetchCounter, LookupError,
};

/// Memory store that can park the next read of a positive record after the
/// record has been fetched, like a slow network response.
#[derive(Default)]
struct SlowPositiveReadStore {
    inner: MemoryKvStore,
    gate: std::sync::Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl SlowPositiveReadStore {
    /// Returns (read reached the store, release the read).
    fn arm(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (reached_tx, reached_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.gate.lock().expect("gate lock") = Some((reached_tx, release_rx));
        (reached_rx, release_tx)
    }
}

#[async_trait]
impl KeyValueStore for SlowPositiveReadStore {
    fn name(&self) -> &'static str {
        "slow-positive-read"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let raw = self.inner.get(key).await;
        let gate = if key.ends_with(":pos") {
            self.gate.lock().expect("gate lock").take()
        } else {
            None
        };
        if let Some((reached, release)) = gate {
            let _ = reached.send(());
            let _ = release.await;
        }
        raw
    }

    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<(), StorageError> {
        self.inner.put(key, value, options).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }
}

// ============================================================================
// SINGLE-FLIGHT
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_share_one_fetch() {
    let cache = CoalescingCache::<u64>::new(StorageConfig::default());
    let counter = FetchCounter::new();

    let calls = (0..32).map(|_| {
        let cache = cache.clone();
        let counter = counter.clone();
        tokio::spawn(async move {
            cache
                .execute_using_cache(read_request("0xalice"), move |_| async move {
                    counter.record();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, LookupError>(42)
                })
                .await
        })
    });

    for outcome in join_all(calls).await {
        let value = outcome
            .expect("task should not panic")
            .expect("fetch should succeed");
        assert_eq!(value, 42);
    }

    assert_eq!(counter.count(), 1);
    assert_eq!(cache.pending_fetches(), 0);
    let stats = cache.stats();
    assert_eq!(stats.fetches, 1);
    assert_eq!(stats.hits + stats.coalesced + 1, 32);
}

#[tokio::test]
async fn test_coalesced_callers_share_the_error() {
    let cache = CoalescingCache::<u64>::new(StorageConfig::default());
    let counter = FetchCounter::new();
    let expected = LookupError::new("rpc timeout");

    let calls = (0..8).map(|_| {
        let counter = counter.clone();
        cache.execute_using_cache("k", move |_| async move {
            counter.record();
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err::<u64, _>(LookupError::new("rpc timeout"))
        })
    });

    for outcome in join_all(calls).await {
        assert_fetch_error(&outcome, &expected);
    }
    assert_eq!(counter.count(), 1);
}

#[tokio::test]
async fn test_fetch_completes_after_callers_stop_waiting() {
    let cache = CoalescingCache::<u64>::new(StorageConfig::default());
    let release = Arc::new(Notify::new());

    let abandoned = {
        let release = release.clone();
        tokio::time::timeout(
            Duration::from_millis(10),
            cache.execute_using_cache("k", move |_| async move {
                release.notified().await;
                Ok::<_, LookupError>(9)
            }),
        )
        .await
    };
    assert!(abandoned.is_err());
    assert_eq!(cache.pending_fetches(), 1);

    release.notify_one();
    for _ in 0..50 {
        if cache.pending_fetches() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(cache.get("k").await, Some(9));
}

// ============================================================================
// TTL
// ============================================================================

#[tokio::test]
async fn test_per_call_ttl_expires() {
    let cache = CoalescingCache::<String>::new(StorageConfig::default());
    cache
        .add("k", "v".to_string(), Some(Duration::from_millis(50)))
        .await;
    assert_eq!(cache.get("k").await.as_deref(), Some("v"));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cache.get("k").await, None);
}

#[tokio::test]
async fn test_configured_ttl_forces_refetch() {
    let cache = CoalescingCache::<u64>::new(StorageConfig::new().with_ttl(Duration::from_millis(50)));
    let counter = FetchCounter::new();

    for _ in 0..2 {
        let counter = counter.clone();
        cache
            .execute_using_cache("k", move |_| async move {
                Ok::<_, LookupError>(counter.record() as u64)
            })
            .await
            .expect("fetch should succeed");
    }
    assert_eq!(counter.count(), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let counter_again = counter.clone();
    let value = cache
        .execute_using_cache("k", move |_| async move {
            Ok::<_, LookupError>(counter_again.record() as u64)
        })
        .await
        .expect("fetch should succeed");
    assert_eq!(value, 1);
    assert_eq!(counter.count(), 2);
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn scenario_a_positive_result_is_served_from_cache() {
    let cache = SplitResultCache::<bool>::new(SplitCacheConfig::default());
    let counter = FetchCounter::new();
    let request = read_request("0xalice");

    let lookup = |counter: FetchCounter| {
        move |_: EntitlementRequest| async move {
            counter.record();
            Ok::<_, LookupError>(CacheResult::positive(true))
        }
    };

    let first = cache
        .execute_using_cache(request.clone(), lookup(counter.clone()))
        .await
        .expect("lookup should succeed");
    assert!(!first.cache_hit);
    assert!(first.is_positive);

    let second = cache
        .execute_using_cache(request, lookup(counter.clone()))
        .await
        .expect("lookup should succeed");
    assert!(second.cache_hit);
    assert_eq!(second.value, first.value);
    assert_eq!(counter.count(), 1);
}

#[tokio::test]
async fn scenario_b_failed_fetch_is_not_cached() {
    let cache = SplitResultCache::<bool>::new(SplitCacheConfig::default());
    let counter = FetchCounter::new();
    let request = read_request("0xbob");

    let failing = counter.clone();
    let outcome = cache
        .execute_using_cache(request.clone(), move |_| async move {
            failing.record();
            Err::<CacheResult<bool>, _>(LookupError::new("rule engine unavailable"))
        })
        .await;
    assert_fetch_error(&outcome, &LookupError::new("rule engine unavailable"));
    assert!(cache.get(&request).await.is_none());

    let retry = counter.clone();
    let result = cache
        .execute_using_cache(request, move |_| async move {
            retry.record();
            Ok::<_, LookupError>(CacheResult::negative(false))
        })
        .await
        .expect("retry should succeed");
    assert!(!result.cache_hit);
    assert_eq!(counter.count(), 2);
}

#[tokio::test]
async fn scenario_c_distinct_keys_fetch_independently() {
    let cache = SplitResultCache::<String>::new(SplitCacheConfig::default());
    let counter = FetchCounter::new();

    let calls = ["0xalice", "0xbob"].map(|user| {
        let counter = counter.clone();
        cache.execute_using_cache(read_request(user), move |request: EntitlementRequest| async move {
            counter.record();
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, LookupError>(CacheResult::positive(request.user_id))
        })
    });

    let results = join_all(calls).await;
    assert_eq!(counter.count(), 2);
    assert_eq!(cache.stats().coalesced, 0);
    let users: Vec<String> = results
        .into_iter()
        .map(|result| result.expect("lookup should succeed").value)
        .collect();
    assert_eq!(users, ["0xalice", "0xbob"]);
}

#[tokio::test]
async fn scenario_d_durable_expiry_beats_provider_minimum() {
    let kv = Arc::new(CountingKvStore::new());
    let factory = DurableStorage::<u64>::factory(kv.clone(), DurableOptions::default());
    let cache = CoalescingCache::with_factory(
        StorageConfig::new().with_ttl(Duration::from_millis(100)),
        &factory,
    );
    let counter = FetchCounter::new();

    let first = counter.clone();
    cache
        .execute_using_cache("k", move |_| async move {
            first.record();
            Ok::<_, LookupError>(1)
        })
        .await
        .expect("fetch should succeed");
    assert_eq!(cache.get("k").await, Some(1));

    tokio::time::sleep(Duration::from_millis(150)).await;
    // The provider keeps the record for at least a minute...
    assert!(kv.inner().contains_key("k"));
    // ...but the adapter's own expiry check hides it.
    assert_eq!(cache.get("k").await, None);

    let second = counter.clone();
    cache
        .execute_using_cache("k", move |_| async move {
            second.record();
            Ok::<_, LookupError>(2)
        })
        .await
        .expect("fetch should succeed");
    assert_eq!(counter.count(), 2);
}

// ============================================================================
// SPLIT CACHE
// ============================================================================

#[tokio::test]
async fn test_negative_expires_while_positive_stays() {
    let cache = SplitResultCache::<bool>::new(fast_split_config());
    let counter = FetchCounter::new();
    let allowed = read_request("0xalice");
    let denied = read_request("0xmallory");

    let classify = |counter: FetchCounter| {
        move |request: EntitlementRequest| async move {
            counter.record();
            Ok::<_, LookupError>(CacheResult::new(
                request.user_id == "0xalice",
                request.user_id == "0xalice",
            ))
        }
    };

    cache
        .execute_using_cache(allowed.clone(), classify(counter.clone()))
        .await
        .expect("lookup should succeed");
    cache
        .execute_using_cache(denied.clone(), classify(counter.clone()))
        .await
        .expect("lookup should succeed");
    assert_eq!(counter.count(), 2);

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let still_allowed = cache
        .execute_using_cache(allowed, classify(counter.clone()))
        .await
        .expect("lookup should succeed");
    assert!(still_allowed.cache_hit);
    assert_eq!(counter.count(), 2);

    let refetched = cache
        .execute_using_cache(denied, classify(counter.clone()))
        .await
        .expect("lookup should succeed");
    assert!(!refetched.cache_hit);
    assert!(!refetched.is_positive);
    assert_eq!(counter.count(), 3);
}

#[tokio::test]
async fn test_invalidation_wins_over_fetch_in_flight() {
    let cache = SplitResultCache::<bool>::new(SplitCacheConfig::default());
    let request = read_request("0xalice");
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let running = {
        let cache = cache.clone();
        let request = request.clone();
        let started = started.clone();
        let release = release.clone();
        tokio::spawn(async move {
            cache
                .execute_using_cache(request, move |_| async move {
                    started.notify_one();
                    release.notified().await;
                    Ok::<_, LookupError>(CacheResult::positive(true))
                })
                .await
        })
    };

    started.notified().await;
    cache.invalidate(&request).await;
    release.notify_one();

    running
        .await
        .expect("task should not panic")
        .expect("lookup should succeed");
    assert!(cache.get(&request).await.is_none());
}

#[tokio::test]
async fn test_invalidate_absent_key_is_noop() {
    let cache = SplitResultCache::<bool>::new(SplitCacheConfig::default());
    cache.invalidate(&read_request("0xnobody")).await;
    assert_eq!(cache.pending_fetches(), 0);
}

#[tokio::test]
async fn test_reclassified_result_moves_backends() {
    let cache = SplitResultCache::<bool>::new(SplitCacheConfig::default());
    let request = read_request("0xalice");

    cache
        .execute_using_cache(request.clone(), |_| async {
            Ok::<_, LookupError>(CacheResult::negative(false))
        })
        .await
        .expect("lookup should succeed");
    cache.invalidate(&request).await;

    let result = cache
        .execute_using_cache(request.clone(), |_| async {
            Ok::<_, LookupError>(CacheResult::positive(true))
        })
        .await
        .expect("lookup should succeed");
    assert!(result.is_positive);

    let hit = cache.get(&request).await.expect("result should be cached");
    assert!(hit.value);
    assert!(hit.cache_hit);
}

#[tokio::test]
async fn test_split_cache_over_shared_durable_namespace() {
    let kv = Arc::new(CountingKvStore::new());
    let factory = DurableStorage::<CacheResult<bool>>::factory(kv.clone(), DurableOptions::default());
    let config = SplitCacheConfig::default().with_key_prefix("entitlement:");
    let cache = SplitResultCache::with_factory(config.clone(), &factory);
    let request = read_request("0xalice");

    cache
        .execute_using_cache(request.clone(), |_| async {
            Ok::<_, LookupError>(CacheResult::positive(true))
        })
        .await
        .expect("lookup should succeed");

    let stored_key = "entitlement:entitlement:0xspace:0xalice:Read:pos";
    let raw = kv.inner().raw(stored_key).expect("positive record should be stored");
    assert!(raw.contains(r#""isPositive":true"#));
    assert!(raw.contains(r#""cacheHit":false"#));

    // A second cache sharing the store sees the result through the remote layer.
    let other = SplitResultCache::with_factory(config, &factory);
    let hit = other.get(&request).await.expect("shared remote result");
    assert!(hit.cache_hit);
    assert!(hit.is_positive);
}

#[tokio::test]
async fn test_invalidation_during_remote_read_is_not_undone() {
    let kv = Arc::new(SlowPositiveReadStore::default());
    let factory = DurableStorage::<CacheResult<bool>>::factory(kv.clone(), DurableOptions::default());
    let config = SplitCacheConfig::default();
    let request = read_request("0xalice");

    // Another node cached a positive result in the shared store.
    let seeder = SplitResultCache::with_factory(config.clone(), &factory);
    seeder
        .execute_using_cache(request.clone(), |_| async {
            Ok::<_, LookupError>(CacheResult::positive(true))
        })
        .await
        .expect("lookup should succeed");

    let cache = SplitResultCache::with_factory(config, &factory);
    let (reached, release) = kv.arm();
    let running = {
        let cache = cache.clone();
        let request = request.clone();
        tokio::spawn(async move {
            cache
                .execute_using_cache(request, |_| async {
                    Ok::<_, LookupError>(CacheResult::positive(true))
                })
                .await
        })
    };

    reached.await.expect("positive read should reach the store");
    cache.invalidate(&request).await;
    release.send(()).expect("read should be parked");

    running
        .await
        .expect("task should not panic")
        .expect("lookup should succeed");
    assert!(cache.get(&request).await.is_none());
    assert!(!kv.inner.contains_key("entitlement:0xspace:0xalice:Read:pos"));
}

#[tokio::test]
async fn test_clear_degrades_when_store_cannot_list() {
    let kv = Arc::new(FailingKvStore::new());
    let factory = DurableStorage::<CacheResult<bool>>::factory(kv, DurableOptions::default());
    let cache =
        SplitResultCache::with_factory(SplitCacheConfig::default().with_key_prefix("ns:"), &factory);

    cache.clear().await.expect("clear should degrade to a no-op");
    assert_eq!(cache.pending_fetches(), 0);
}
