//! WARDEN Cache - Single-Flight Result Caches
//!
//! Caches for expensive, idempotent async lookups:
//!
//! - [`CoalescingCache`]: `key -> value` with at most one fetch in flight per key.
//! - [`SplitResultCache`]: the same protocol over two backends, so "allowed"
//!   and "denied" answers expire independently.
//!
//! Both run over any [`warden_storage::StorageBackend`], chosen through a
//! [`warden_storage::StorageFactory`] at construction time.
//!
//! ```ignore
//! use warden_cache::{CacheResult, SplitResultCache};
//! use warden_core::SplitCacheConfig;
//!
//! let cache = SplitResultCache::new(SplitCacheConfig::from_env());
//! let result = cache
//!     .execute_using_cache(request, |request| async move {
//!         let allowed = evaluate(&request).await?;
//!         Ok::<_, RpcError>(CacheResult::new(allowed, allowed))
//!     })
//!     .await?;
//! ```

mod inflight;

pub mod coalescing;
pub mod split;
pub mod stats;

pub use coalescing::{CoalescingCache, ExecuteOptions};
pub use split::{CacheResult, SplitResultCache};
pub use stats::CacheStats;

// Re-export the vocabulary callers need alongside the caches.
pub use warden_core::{CacheKey, Keyable, SplitCacheConfig, StorageConfig, WardenError, WardenResult};
