//! Durable key-value adapter.
//!
//! Remote key-value services expire data in whole seconds and refuse TTLs
//! below a provider minimum, so a 2 second negative result would otherwise
//! live for a full minute. Each record therefore carries its own expiry:
//!
//! ```text
//! { "value": <normalized value>, "expiresAt": 1700000002000 }
//! ```
//!
//! The remote TTL is only a garbage-collection hint (`max(minimum, ceil(ttl))`);
//! `expiresAt` is checked on every read and wins. An optional local
//! [`TtlStore`] sits in front of the remote store to skip network round trips
//! for hot keys.
//!
//! Remote failures never surface to callers. They are logged and treated as a
//! miss (reads) or a no-op (writes).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use warden_core::{CacheKey, DurableOptions, StorageConfig, StorageError};

use crate::backend::{StorageBackend, StorageFactory};
use crate::kv::{KeyValueStore, PutOptions};
use crate::memory::{CacheEntry, TtlStore};

/// On-the-wire record held by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord<V> {
    pub value: V,
    /// Absolute expiry in Unix epoch milliseconds. `None` never expires.
    pub expires_at: Option<i64>,
}

impl<V> StoredRecord<V> {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| now_ms >= at)
    }

    /// Time left before expiry, or `None` for records that never expire.
    pub fn remaining_ttl(&self, now_ms: i64) -> Option<Duration> {
        self.expires_at
            .map(|at| Duration::from_millis(u64::try_from(at - now_ms).unwrap_or(0)))
    }
}

/// Local copies of remote records.
///
/// `epoch` advances on every local write or removal. A remote read only
/// fills the layer if the epoch it saw before going remote is still
/// current, so a read that straddles a `set` or `delete` cannot put back
/// the value that write replaced.
struct LocalLayer<V> {
    entries: TtlStore<V>,
    epoch: u64,
}

impl<V: Clone> LocalLayer<V> {
    fn remove(&mut self, physical: &str) {
        self.epoch = self.epoch.wrapping_add(1);
        self.entries.delete(physical);
    }
}

/// [`StorageBackend`] over a remote [`KeyValueStore`].
pub struct DurableStorage<V> {
    store: Arc<dyn KeyValueStore>,
    config: StorageConfig,
    options: DurableOptions,
    local: Option<Mutex<LocalLayer<V>>>,
}

impl<V> DurableStorage<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn KeyValueStore>, config: StorageConfig, options: DurableOptions) -> Self {
        let local = options
            .local_cache
            .then(|| {
                Mutex::new(LocalLayer {
                    entries: TtlStore::new(options.local_max_size, None),
                    epoch: 0,
                })
            });
        Self {
            store,
            config,
            options,
            local,
        }
    }

    /// Factory building adapters that share one remote store.
    ///
    /// Each adapter gets its own local layer; only remote data is shared.
    pub fn factory(store: Arc<dyn KeyValueStore>, options: DurableOptions) -> StorageFactory<V> {
        Arc::new(move |config: StorageConfig| {
            Arc::new(DurableStorage::<V>::new(store.clone(), config, options.clone()))
                as Arc<dyn StorageBackend<V>>
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn options(&self) -> &DurableOptions {
        &self.options
    }

    /// Drop every entry held by the local layer. Remote data is untouched.
    pub fn clear_local(&self) {
        if let Some(mut local) = self.local() {
            local.epoch = local.epoch.wrapping_add(1);
            local.entries.clear();
        }
    }

    /// Number of entries in the local layer, 0 when it is disabled.
    pub fn local_len(&self) -> usize {
        self.local().map_or(0, |local| local.entries.len())
    }

    /// Whole-second TTL sent to the remote store.
    pub fn remote_ttl_seconds(&self, ttl: Option<Duration>) -> Option<u64> {
        ttl.map(|ttl| {
            let seconds = ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0));
            seconds.max(self.options.min_remote_ttl.as_secs())
        })
    }

    fn local(&self) -> Option<MutexGuard<'_, LocalLayer<V>>> {
        self.local
            .as_ref()
            .map(|local| local.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn drop_local(&self, physical: &str) {
        if let Some(mut local) = self.local() {
            local.remove(physical);
        }
    }

    async fn delete_remote(&self, physical: &str) {
        if let Err(e) = self.store.delete(physical).await {
            tracing::warn!(
                key = %physical,
                store = self.store.name(),
                error = %e,
                "Durable delete failed"
            );
        }
    }
}

fn expires_at_ms(now_ms: i64, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)))
}

#[async_trait]
impl<V> StorageBackend<V> for DurableStorage<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "durable"
    }

    async fn get(&self, key: &CacheKey) -> Option<V> {
        let physical = self.config.storage_key(key.as_str());

        let mut epoch = None;
        if let Some(mut local) = self.local() {
            if let Some(value) = local.entries.get(&physical) {
                tracing::trace!(key = %physical, "Durable local hit");
                return Some(value);
            }
            epoch = Some(local.epoch);
        }

        let raw = match self.store.get(&physical).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(
                    key = %physical,
                    store = self.store.name(),
                    error = %e,
                    "Durable read failed, treating as miss"
                );
                return None;
            }
        };

        let record: StoredRecord<V> = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    key = %physical,
                    error = %e,
                    "Malformed durable record, treating as miss"
                );
                return None;
            }
        };

        let now_ms = Utc::now().timestamp_millis();
        if record.is_expired(now_ms) {
            tracing::trace!(key = %physical, "Durable record past expiresAt");
            self.drop_local(&physical);
            self.delete_remote(&physical).await;
            return None;
        }

        if let Some(mut local) = self.local() {
            if epoch == Some(local.epoch) {
                local.entries.insert(
                    physical,
                    CacheEntry::new(record.value.clone(), record.remaining_ttl(now_ms)),
                );
            } else {
                tracing::trace!(key = %physical, "Local layer changed during read, not filling");
            }
        }
        Some(record.value)
    }

    async fn set(&self, key: &CacheKey, value: V, ttl: Option<Duration>) {
        let physical = self.config.storage_key(key.as_str());
        let ttl = self.config.effective_ttl(ttl);

        let record = StoredRecord {
            value: &value,
            expires_at: expires_at_ms(Utc::now().timestamp_millis(), ttl),
        };
        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %physical, error = %e, "Failed to serialize durable record");
                self.drop_local(&physical);
                return;
            }
        };

        let options = PutOptions {
            ttl_seconds: self.remote_ttl_seconds(ttl),
        };
        match self.store.put(&physical, &raw, options).await {
            Ok(()) => {
                if let Some(mut local) = self.local() {
                    local.epoch = local.epoch.wrapping_add(1);
                    local.entries.insert(physical, CacheEntry::new(value, ttl));
                }
            }
            Err(e) => {
                tracing::warn!(
                    key = %physical,
                    store = self.store.name(),
                    error = %e,
                    "Durable write failed"
                );
                // A stale local copy must not outlive a failed write.
                self.drop_local(&physical);
            }
        }
    }

    async fn delete(&self, key: &CacheKey) {
        let physical = self.config.storage_key(key.as_str());
        self.drop_local(&physical);
        self.delete_remote(&physical).await;
        // A read that began before the remote delete landed may have
        // filled the local layer in between.
        self.drop_local(&physical);
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.clear_local();

        if self.config.key_prefix.is_empty() {
            return Err(StorageError::Unsupported {
                backend: self.name(),
                operation: "clear",
            });
        }

        let keys = match self.store.list(&self.config.key_prefix).await {
            Ok(keys) => keys,
            Err(e @ StorageError::Unsupported { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(
                    prefix = %self.config.key_prefix,
                    store = self.store.name(),
                    error = %e,
                    "Durable list failed, namespace not cleared"
                );
                return Ok(());
            }
        };
        let mut failed = 0usize;
        for physical in keys
            .iter()
            .filter(|physical| physical.ends_with(&self.config.key_postfix))
        {
            if let Err(e) = self.store.delete(physical).await {
                failed += 1;
                tracing::warn!(
                    key = %physical,
                    store = self.store.name(),
                    error = %e,
                    "Durable delete failed during clear"
                );
            }
        }
        // Reads that raced the deletes may have refilled the local layer.
        self.clear_local();
        tracing::debug!(prefix = %self.config.key_prefix, failed, "Cleared durable namespace");
        Ok(())
    }
}
