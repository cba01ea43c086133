//! WARDEN Storage - Backend Contract and Backends
//!
//! Defines the storage abstraction every cache runs over, the default
//! in-memory TTL backend, and the durable adapter for remote key-value stores.
//! Caches pick a backend through a [`StorageFactory`] at construction time.

pub mod backend;
pub mod codec;
pub mod durable;
pub mod kv;
pub mod memory;
pub mod value;

pub use backend::{memory_factory, StorageBackend, StorageFactory};
pub use codec::{denormalize, normalize};
pub use durable::{DurableStorage, StoredRecord};
pub use kv::{HttpKvConfig, HttpKvStore, KeyValueStore, MemoryKvStore, PutOptions};
pub use memory::{CacheEntry, MemoryStorage, TtlStore};
pub use value::{CacheValue, StructValue, BIGINT_TAG, STRUCT_TAG};
