//! Cache keys and the `Keyable` contract.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque cache key derived from a request.
///
/// Two logically equivalent requests must produce equal keys, and distinct
/// requests must not collide. Backends may decorate the key with a prefix
/// or postfix before it reaches the physical store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// A request that deterministically maps to a [`CacheKey`].
pub trait Keyable {
    fn to_key(&self) -> CacheKey;
}

impl Keyable for CacheKey {
    fn to_key(&self) -> CacheKey {
        self.clone()
    }
}

impl Keyable for String {
    fn to_key(&self) -> CacheKey {
        CacheKey(self.clone())
    }
}

impl Keyable for str {
    fn to_key(&self) -> CacheKey {
        CacheKey(self.to_string())
    }
}

impl<T: Keyable + ?Sized> Keyable for &T {
    fn to_key(&self) -> CacheKey {
        (**self).to_key()
    }
}
