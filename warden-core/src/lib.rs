//! WARDEN Core - Keys, Configuration and Errors
//!
//! Shared vocabulary for the WARDEN result cache. Every other crate in the
//! workspace depends on this one; it carries no caching behavior itself.

pub mod config;
pub mod error;
pub mod key;

pub use config::{
    DurableOptions, SplitCacheConfig, StorageConfig, DEFAULT_MAX_SIZE, DEFAULT_MIN_REMOTE_TTL,
};
pub use error::{ConfigError, FetchError, StorageError, WardenError, WardenResult};
pub use key::{CacheKey, Keyable};
