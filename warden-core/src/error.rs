//! Error types for WARDEN operations

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Operation {operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("Remote store request failed: {reason}")]
    Remote { reason: String },

    #[error("Remote store responded with status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Deserialization failed: {reason}")]
    Deserialization { reason: String },

    #[error("Invalid value: {reason}")]
    InvalidValue { reason: String },

    #[error("TTL of {requested:?} is below the store minimum of {minimum:?}")]
    TtlTooShort {
        requested: Duration,
        minimum: Duration,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Error produced by a caller-supplied fetch function.
///
/// Every caller coalesced onto one fetch receives the same error, so the
/// original error is kept behind an `Arc` and shared between them.
#[derive(Clone)]
pub struct FetchError(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl FetchError {
    /// Wrap a fetch function's error.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// Borrow the original error as a concrete type, if it is one.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.0)
    }
}

/// Master error type for all WARDEN errors.
#[derive(Debug, Clone, Error)]
pub enum WardenError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch failed for key {key}: {source}")]
    Fetch { key: String, source: FetchError },

    #[error("Fetch for key {key} did not complete: {reason}")]
    FetchAborted { key: String, reason: String },
}

impl WardenError {
    /// Returns the fetch function's error if this is a fetch failure.
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            Self::Fetch { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type alias for WARDEN operations.
pub type WardenResult<T> = Result<T, WardenError>;

// =============================================================================
// TESTS
// =============================================================================
