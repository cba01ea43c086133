//! Boundary to remote key-value services.
//!
//! Values crossing this boundary are always strings. TTLs are expressed in
//! whole seconds and providers typically enforce a minimum; the durable
//! adapter owns rounding and clamping so implementations can stay thin.

pub mod http;
pub mod memory;

pub use http::{HttpKvConfig, HttpKvStore};
pub use memory::MemoryKvStore;

use async_trait::async_trait;
use warden_core::StorageError;

/// Options for a single `put`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Provider-side expiry in seconds. `None` keeps the value indefinitely.
    pub ttl_seconds: Option<u64>,
}

impl PutOptions {
    pub fn with_ttl_seconds(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds: Some(ttl_seconds),
        }
    }
}

/// A remote, eventually consistent string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Short store name used in logs and errors.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List every key starting with `prefix`.
    async fn list(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
        Err(StorageError::Unsupported {
            backend: self.name(),
            operation: "list",
        })
    }
}
