//! Storage backend contract and backend factories.
//!
//! Caches never talk to a physical store directly. They hold an
//! `Arc<dyn StorageBackend<V>>` built by a [`StorageFactory`], so the same
//! cache logic runs over the in-memory store or a durable remote store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use warden_core::{CacheKey, StorageConfig, StorageError};

use crate::memory::MemoryStorage;

/// Uniform async interface over a physical key-value store.
///
/// # Contract
///
/// - `get` on an absent or expired key returns `None`, never an error.
/// - Values are returned by value. Callers own what they get back and
///   cannot reach the stored copy.
/// - All operations may be called concurrently without external locking.
/// - `clear` is optional; backends that cannot clear cheaply keep the
///   default implementation, which reports [`StorageError::Unsupported`].
#[async_trait]
pub trait StorageBackend<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Get a value, or `None` if it is absent or expired.
    async fn get(&self, key: &CacheKey) -> Option<V>;

    /// Store a value. `ttl` overrides the backend's configured default.
    async fn set(&self, key: &CacheKey, value: V, ttl: Option<Duration>);

    /// Remove a value. Deleting an absent key is a no-op.
    async fn delete(&self, key: &CacheKey);

    /// Remove every value held by this backend.
    async fn clear(&self) -> Result<(), StorageError> {
        Err(StorageError::Unsupported {
            backend: self.name(),
            operation: "clear",
        })
    }
}

/// Builds a backend from a [`StorageConfig`].
pub type StorageFactory<V> = Arc<dyn Fn(StorageConfig) -> Arc<dyn StorageBackend<V>> + Send + Sync>;

/// Factory producing the default in-memory backend.
pub fn memory_factory<V>() -> StorageFactory<V>
where
    V: Clone + Send + Sync + 'static,
{
    Arc::new(|config: StorageConfig| {
        Arc::new(MemoryStorage::<V>::new(config)) as Arc<dyn StorageBackend<V>>
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ReadOnlyBackend;

    #[async_trait]
    impl StorageBackend<u32> for ReadOnlyBackend {
        fn name(&self) -> &'static str {
            "read-only"
        }

        async fn get(&self, _key: &CacheKey) -> Option<u32> {
            Some(1)
        }

        async fn set(&self, _key: &CacheKey, _value: u32, _ttl: Option<Duration>) {}

        async fn delete(&self, _key: &CacheKey) {}
    }

    #[tokio::test]
    async fn test_default_clear_is_unsupported() {
        let backend = ReadOnlyBackend;
        let err = backend.clear().await.unwrap_err();
        assert_eq!(
            err,
            StorageError::Unsupported {
                backend: "read-only",
                operation: "clear",
            }
        );
    }

    #[tokio::test]
    async fn test_memory_factory_builds_independent_backends() {
        let factory = memory_factory::<String>();
        let first = factory(StorageConfig::default());
        let second = factory(StorageConfig::default());
        let key = CacheKey::new("shared");

        first.set(&key, "one".to_string(), None).await;
        assert_eq!(first.get(&key).await.as_deref(), Some("one"));
        assert!(second.get(&key).await.is_none());
        assert_eq!(first.name(), "memory");
    }
}
