//! In-memory TTL store.
//!
//! [`TtlStore`] is a synchronous, LRU-bounded map whose entries carry an
//! absolute expiry. [`MemoryStorage`] wraps it behind the async
//! [`StorageBackend`] contract and is the default backend for every cache.
//! The durable adapter reuses `TtlStore` directly as its local layer.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use warden_core::{CacheKey, StorageConfig, StorageError};

use crate::backend::StorageBackend;

/// A stored value together with its absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    /// `None` means the entry never expires.
    pub expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            // A TTL past the clock's range never expires.
            expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Time left before expiry, or `None` for entries that never expire.
    pub fn remaining_ttl(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

/// Synchronous TTL map bounded by least-recently-used eviction.
///
/// Expired entries are never returned, whether or not they have been
/// physically removed yet. Eviction only bounds memory.
pub struct TtlStore<V> {
    entries: LruCache<String, CacheEntry<V>>,
    default_ttl: Option<Duration>,
    evictions: u64,
}

impl<V: Clone> TtlStore<V> {
    /// Create a store holding at most `max_size` entries (at least one).
    pub fn new(max_size: usize, default_ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            default_ttl,
            evictions: 0,
        }
    }

    /// Get a live value, dropping it if it has expired.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.pop(key);
        }
        None
    }

    /// Insert a value. `ttl` overrides the store's default TTL.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let entry = CacheEntry::new(value, ttl.or(self.default_ttl));
        self.insert(key.into(), entry);
    }

    /// Insert a prepared entry, evicting the least-recently-used one if full.
    pub fn insert(&mut self, key: String, entry: CacheEntry<V>) {
        if let Some((evicted, _)) = self.entries.push(key.clone(), entry) {
            if evicted != key {
                self.evictions += 1;
            }
        }
    }

    /// Remaining TTL of a live entry. The outer `None` means "absent".
    pub fn remaining_ttl(&mut self, key: &str) -> Option<Option<Duration>> {
        let now = Instant::now();
        let entry = self.entries.peek(key)?;
        if entry.is_expired(now) {
            self.entries.pop(key);
            return None;
        }
        Some(entry.remaining_ttl(now))
    }

    /// Remove an entry. Returns whether a live entry was removed.
    pub fn delete(&mut self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .pop(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Physically drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries held, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Number of live entries pushed out by capacity pressure.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}

/// Default in-process [`StorageBackend`].
pub struct MemoryStorage<V> {
    store: Mutex<TtlStore<V>>,
    config: StorageConfig,
}

impl<V: Clone> MemoryStorage<V> {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            store: Mutex::new(TtlStore::new(config.max_size, config.ttl)),
            config,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.store().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store().is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.store().evictions()
    }

    fn store(&self) -> MutexGuard<'_, TtlStore<V>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<V> StorageBackend<V> for MemoryStorage<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> Option<V> {
        let physical = self.config.storage_key(key.as_str());
        self.store().get(&physical)
    }

    async fn set(&self, key: &CacheKey, value: V, ttl: Option<Duration>) {
        let physical = self.config.storage_key(key.as_str());
        self.store().set(physical, value, ttl);
    }

    async fn delete(&self, key: &CacheKey) {
        let physical = self.config.storage_key(key.as_str());
        self.store().delete(&physical);
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.store().clear();
        Ok(())
    }
}
