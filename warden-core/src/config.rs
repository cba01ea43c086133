//! Storage and cache configuration.
//!
//! Configuration is supplied once when a backend or cache is constructed.
//! The `from_env` constructors read `WARDEN_*` environment variables and fall
//! back to the defaults for anything missing or unparsable.

use std::time::Duration;

use crate::error::ConfigError;

/// Default bound on entries held by one backend.
pub const DEFAULT_MAX_SIZE: usize = 10_000;

/// Minimum TTL accepted by typical remote key-value providers.
pub const DEFAULT_MIN_REMOTE_TTL: Duration = Duration::from_secs(60);

// ============================================================================
// STORAGE CONFIGURATION
// ============================================================================

/// Configuration handed to a storage backend at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Default time-to-live for entries. `None` means entries never expire.
    pub ttl: Option<Duration>,
    /// Maximum number of entries before capacity eviction kicks in.
    pub max_size: usize,
    /// Prepended to every key before it reaches the physical store.
    pub key_prefix: String,
    /// Appended to every key before it reaches the physical store.
    pub key_postfix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            max_size: DEFAULT_MAX_SIZE,
            key_prefix: String::new(),
            key_postfix: String::new(),
        }
    }
}

impl StorageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_key_postfix(mut self, postfix: impl Into<String>) -> Self {
        self.key_postfix = postfix.into();
        self
    }

    /// Build the physical key for a cache key.
    pub fn storage_key(&self, key: &str) -> String {
        let mut physical =
            String::with_capacity(self.key_prefix.len() + key.len() + self.key_postfix.len());
        physical.push_str(&self.key_prefix);
        physical.push_str(key);
        physical.push_str(&self.key_postfix);
        physical
    }

    /// Resolve the TTL for a write, preferring the per-call override.
    pub fn effective_ttl(&self, ttl_override: Option<Duration>) -> Option<Duration> {
        ttl_override.or(self.ttl)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_size".to_string(),
                value: self.max_size.to_string(),
                reason: "max_size must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// DURABLE ADAPTER OPTIONS
// ============================================================================

/// Options specific to the durable key-value adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableOptions {
    /// Whether the synchronous local fast-path layer is enabled.
    pub local_cache: bool,
    /// Maximum entries held by the local layer.
    pub local_max_size: usize,
    /// Smallest TTL the remote store accepts.
    pub min_remote_ttl: Duration,
}

impl Default for DurableOptions {
    fn default() -> Self {
        Self {
            local_cache: true,
            local_max_size: 1_000,
            min_remote_ttl: DEFAULT_MIN_REMOTE_TTL,
        }
    }
}

impl DurableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_cache(mut self, enabled: bool) -> Self {
        self.local_cache = enabled;
        self
    }

    pub fn with_local_max_size(mut self, max_size: usize) -> Self {
        self.local_max_size = max_size;
        self
    }

    pub fn with_min_remote_ttl(mut self, ttl: Duration) -> Self {
        self.min_remote_ttl = ttl;
        self
    }

    /// Create options from environment variables.
    ///
    /// Environment variables:
    /// - `WARDEN_DURABLE_LOCAL_CACHE`: "false" disables the local layer (default: true)
    /// - `WARDEN_DURABLE_LOCAL_CACHE_SIZE`: local layer capacity (default: 1000)
    /// - `WARDEN_DURABLE_MIN_TTL_SECS`: remote minimum TTL (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let local_cache = std::env::var("WARDEN_DURABLE_LOCAL_CACHE")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.local_cache);

        let local_max_size = env_positive("WARDEN_DURABLE_LOCAL_CACHE_SIZE")
            .map(|n| n as usize)
            .unwrap_or(defaults.local_max_size);

        let min_remote_ttl = env_positive("WARDEN_DURABLE_MIN_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.min_remote_ttl);

        Self {
            local_cache,
            local_max_size,
            min_remote_ttl,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_cache && self.local_max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "local_max_size".to_string(),
                value: self.local_max_size.to_string(),
                reason: "local_max_size must be greater than 0 when the local cache is enabled"
                    .to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// SPLIT-RESULT CACHE CONFIGURATION
// ============================================================================

/// Configuration for a cache that partitions results into positive and
/// negative backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitCacheConfig {
    /// TTL for positive ("allowed") results.
    pub positive_ttl: Duration,
    /// TTL for negative ("denied") results, usually about one block.
    pub negative_ttl: Duration,
    pub positive_max_size: usize,
    pub negative_max_size: usize,
    /// Namespace prefix shared by both backends.
    pub key_prefix: String,
}

impl Default for SplitCacheConfig {
    fn default() -> Self {
        Self {
            positive_ttl: Duration::from_secs(15 * 60),
            negative_ttl: Duration::from_secs(2),
            positive_max_size: DEFAULT_MAX_SIZE,
            negative_max_size: DEFAULT_MAX_SIZE,
            key_prefix: String::new(),
        }
    }
}

impl SplitCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positive_ttl(mut self, ttl: Duration) -> Self {
        self.positive_ttl = ttl;
        self
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    pub fn with_positive_max_size(mut self, max_size: usize) -> Self {
        self.positive_max_size = max_size;
        self
    }

    pub fn with_negative_max_size(mut self, max_size: usize) -> Self {
        self.negative_max_size = max_size;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Create a config from environment variables.
    ///
    /// Environment variables (non-positive or unparsable values keep the default):
    /// - `WARDEN_POSITIVE_CACHE_TTL_SECS` (default: 900)
    /// - `WARDEN_NEGATIVE_CACHE_TTL_SECS` (default: 2)
    /// - `WARDEN_POSITIVE_CACHE_SIZE` (default: 10000)
    /// - `WARDEN_NEGATIVE_CACHE_SIZE` (default: 10000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            positive_ttl: env_positive("WARDEN_POSITIVE_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.positive_ttl),
            negative_ttl: env_positive("WARDEN_NEGATIVE_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.negative_ttl),
            positive_max_size: env_positive("WARDEN_POSITIVE_CACHE_SIZE")
                .map(|n| n as usize)
                .unwrap_or(defaults.positive_max_size),
            negative_max_size: env_positive("WARDEN_NEGATIVE_CACHE_SIZE")
                .map(|n| n as usize)
                .unwrap_or(defaults.negative_max_size),
            key_prefix: defaults.key_prefix,
        }
    }

    /// Storage config for the positive backend.
    pub fn positive_storage(&self) -> StorageConfig {
        StorageConfig::new()
            .with_ttl(self.positive_ttl)
            .with_max_size(self.positive_max_size)
            .with_key_prefix(self.key_prefix.clone())
            .with_key_postfix(":pos")
    }

    /// Storage config for the negative backend.
    pub fn negative_storage(&self) -> StorageConfig {
        StorageConfig::new()
            .with_ttl(self.negative_ttl)
            .with_max_size(self.negative_max_size)
            .with_key_prefix(self.key_prefix.clone())
            .with_key_postfix(":neg")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.positive_storage().validate()?;
        self.negative_storage().validate()?;
        if self.negative_ttl > self.positive_ttl {
            return Err(ConfigError::InvalidValue {
                field: "negative_ttl".to_string(),
                value: format!("{:?}", self.negative_ttl),
                reason: "negative_ttl must not exceed positive_ttl".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse a strictly positive integer from the environment.
fn env_positive(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|n| *n > 0)
}
