//! In-process key-value store with provider-style TTL rules.
//!
//! Behaves like a hosted key-value service: TTLs are whole seconds and must
//! meet a minimum (60 seconds by default). Useful for local development and
//! for exercising the durable adapter without a network.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use warden_core::{StorageError, DEFAULT_MIN_REMOTE_TTL};

use super::{KeyValueStore, PutOptions};

#[derive(Debug, Clone)]
struct StoredString {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredString {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process [`KeyValueStore`].
#[derive(Debug)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, StoredString>>,
    min_ttl: Duration,
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            min_ttl: DEFAULT_MIN_REMOTE_TTL,
        }
    }

    /// Override the minimum TTL the store accepts.
    pub fn with_min_ttl(mut self, min_ttl: Duration) -> Self {
        self.min_ttl = min_ttl;
        self
    }

    pub fn min_ttl(&self) -> Duration {
        self.min_ttl
    }

    /// Whether the provider still holds `key` by its own expiry rules.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries()
            .get(key)
            .is_some_and(|stored| stored.is_live(now))
    }

    /// Raw stored string, by the provider's own expiry rules.
    pub fn raw(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries()
            .get(key)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.value.clone())
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries()
            .values()
            .filter(|stored| stored.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, StoredString>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    fn name(&self) -> &'static str {
        "memory-kv"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(stored) if stored.is_live(now) => Ok(Some(stored.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<(), StorageError> {
        let expires_at = match options.ttl_seconds {
            Some(seconds) => {
                let requested = Duration::from_secs(seconds);
                if requested < self.min_ttl {
                    return Err(StorageError::TtlTooShort {
                        requested,
                        minimum: self.min_ttl,
                    });
                }
                // Out-of-range TTLs never expire.
                Instant::now().checked_add(requested)
            }
            None => None,
        };

        self.entries().insert(
            key.to_string(),
            StoredString {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries()
            .iter()
            .filter(|(key, stored)| key.starts_with(prefix) && stored.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
