//! WARDEN Test Utilities
//!
//! Centralized test infrastructure for the WARDEN workspace:
//! - Proptest generators for cache values and requests
//! - Key-value store doubles that count or fail calls
//! - Test fixtures for common scenarios
//! - Custom assertions for WARDEN-specific validation

pub use warden_core::{
    CacheKey, ConfigError, DurableOptions, FetchError, Keyable, SplitCacheConfig, StorageConfig,
    StorageError, WardenError, WardenResult,
};
pub use warden_storage::{
    CacheValue, KeyValueStore, MemoryKvStore, PutOptions, StructValue, BIGINT_TAG, STRUCT_TAG,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

// ============================================================================
// KEY-VALUE STORE DOUBLES
// ============================================================================

/// Memory key-value store that counts calls reaching it.
#[derive(Debug, Default)]
pub struct CountingKvStore {
    inner: MemoryKvStore,
    gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl CountingKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count calls on top of a store with a custom minimum TTL.
    pub fn with_min_ttl(min_ttl: Duration) -> Self {
        Self {
            inner: MemoryKvStore::new().with_min_ttl(min_ttl),
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &MemoryKvStore {
        &self.inner
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for CountingKvStore {
    fn name(&self) -> &'static str {
        "counting-kv"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, value, options).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }
}

/// Key-value store whose every call fails, simulating an outage.
#[derive(Debug, Default)]
pub struct FailingKvStore {
    calls: AtomicUsize,
}

impl FailingKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn outage(&self) -> StorageError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        StorageError::Remote {
            reason: "store unavailable".to_string(),
        }
    }
}

#[async_trait]
impl KeyValueStore for FailingKvStore {
    fn name(&self) -> &'static str {
        "failing-kv"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(self.outage())
    }

    async fn put(&self, _key: &str, _value: &str, _options: PutOptions) -> Result<(), StorageError> {
        Err(self.outage())
    }

    async fn delete(&self, _key: &str) -> Result<(), StorageError> {
        Err(self.outage())
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
        Err(self.outage())
    }
}

// ============================================================================
// FETCH COUNTING
// ============================================================================

/// Shared counter for fetch-function invocations.
///
/// Clones share one count, so a clone can be moved into each fetch closure.
#[derive(Debug, Clone, Default)]
pub struct FetchCounter {
    count: Arc<AtomicUsize>,
}

impl FetchCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invocation and return how many came before it.
    pub fn record(&self) -> usize {
        self.count.fetch_add(1, Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Error returned by test fetch functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupError(pub String);

impl LookupError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lookup failed: {}", self.0)
    }
}

impl std::error::Error for LookupError {}

// ============================================================================
// REQUEST TYPES
// ============================================================================

/// Entitlement check for one user, space and permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntitlementRequest {
    pub space_id: String,
    pub user_id: String,
    pub permission: String,
}

impl EntitlementRequest {
    pub fn new(
        space_id: impl Into<String>,
        user_id: impl Into<String>,
        permission: impl Into<String>,
    ) -> Self {
        Self {
            space_id: space_id.into(),
            user_id: user_id.into(),
            permission: permission.into(),
        }
    }
}

impl Keyable for EntitlementRequest {
    fn to_key(&self) -> CacheKey {
        CacheKey::new(format!(
            "entitlement:{}:{}:{}",
            self.space_id, self.user_id, self.permission
        ))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating WARDEN values.

    use super::*;
    use num_bigint::BigInt;
    use proptest::prelude::*;

    /// Generate a struct member or object key. Never starts with `_`, so it
    /// cannot collide with the reserved tags.
    pub fn arb_member_name() -> impl Strategy<Value = String> {
        "[a-z][a-zA-Z0-9]{0,8}"
    }

    /// Generate arbitrary-precision integers, including ones far beyond `u64`.
    pub fn arb_bigint() -> impl Strategy<Value = BigInt> {
        prop_oneof![
            any::<i128>().prop_map(BigInt::from),
            "-?[1-9][0-9]{30,80}".prop_map(|digits| digits.parse::<BigInt>().unwrap_or_default()),
        ]
    }

    /// Generate scalar cache values.
    pub fn arb_scalar() -> impl Strategy<Value = CacheValue> {
        prop_oneof![
            Just(CacheValue::Null),
            any::<bool>().prop_map(CacheValue::Bool),
            any::<i64>().prop_map(CacheValue::from),
            any::<u64>().prop_map(CacheValue::from),
            ".{0,16}".prop_map(CacheValue::String),
            arb_bigint().prop_map(CacheValue::BigInt),
        ]
    }

    /// Generate a struct value from member values drawn from `member`.
    pub fn arb_struct_value<S>(member: S) -> impl Strategy<Value = StructValue>
    where
        S: Strategy<Value = CacheValue>,
    {
        prop::collection::vec((arb_member_name(), member), 1..6)
            .prop_filter_map("member names must be unique", |fields| {
                StructValue::new(fields).ok()
            })
    }

    /// Generate nested cache values mixing arrays, objects, structs and
    /// big integers.
    pub fn arb_cache_value() -> impl Strategy<Value = CacheValue> {
        arb_scalar().prop_recursive(4, 48, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(CacheValue::Array),
                prop::collection::btree_map(arb_member_name(), inner.clone(), 0..6)
                    .prop_map(CacheValue::Object),
                arb_struct_value(inner).prop_map(CacheValue::Struct),
            ]
        })
    }

    /// Generate an entitlement request.
    pub fn arb_entitlement_request() -> impl Strategy<Value = EntitlementRequest> {
        (
            "0x[0-9a-f]{8}",
            "0x[0-9a-f]{8}",
            prop_oneof![Just("Read"), Just("Write"), Just("Ban"), Just("Moderate")],
        )
            .prop_map(|(space, user, permission)| EntitlementRequest::new(space, user, permission))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use num_bigint::BigInt;

    /// Membership lookup result shaped like a typed contract-call return.
    pub fn membership_status(token_id: u64) -> CacheValue {
        let fields = StructValue::new([
            ("owner", CacheValue::from("0x00000000000000000000000000000000000000ab")),
            ("tokenId", CacheValue::BigInt(BigInt::from(token_id))),
            ("expiresAt", CacheValue::BigInt(BigInt::from(1_893_456_000_000u64))),
            ("isActive", CacheValue::Bool(true)),
        ]);
        match fields {
            Ok(fields) => CacheValue::Struct(fields),
            Err(e) => panic!("membership fixture is invalid: {e}"),
        }
    }

    /// Split config with the short TTLs used by the expiry tests.
    pub fn fast_split_config() -> SplitCacheConfig {
        SplitCacheConfig::new()
            .with_positive_ttl(Duration::from_secs(60))
            .with_negative_ttl(Duration::from_secs(1))
    }

    pub fn read_request(user_id: &str) -> EntitlementRequest {
        EntitlementRequest::new("0xspace", user_id, "Read")
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for WARDEN results.

    use super::*;

    /// Assert that a result is a fetch failure wrapping `expected`.
    #[track_caller]
    pub fn assert_fetch_error<T: std::fmt::Debug>(result: &WardenResult<T>, expected: &LookupError) {
        match result {
            Err(WardenError::Fetch { source, .. }) => {
                assert_eq!(source.downcast_ref::<LookupError>(), Some(expected));
            }
            other => panic!("Expected Fetch error, got: {:?}", other),
        }
    }

    /// Assert that a cache value is a struct whose positional and named
    /// accessors agree for every member.
    #[track_caller]
    pub fn assert_struct_access_agrees(value: &CacheValue) {
        let fields = match value.as_struct() {
            Some(fields) => fields,
            None => panic!("Expected Struct value, got: {:?}", value),
        };
        for (index, name) in fields.names().enumerate() {
            assert_eq!(fields.get(index), fields.field(name), "member {name} at {index}");
            assert_eq!(fields.position(name), Some(index));
        }
    }
}
