//! Property-Based Tests for Value Normalization
//!
//! For any value built from nested objects, arrays, struct values and big
//! integers, normalizing, serializing to a string and reading it back yields
//! a deep-equal value, with positional and named access intact on structs.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use warden_core::{CacheKey, DurableOptions, StorageConfig};
use warden_storage::{denormalize, normalize, CacheValue, DurableStorage, StorageBackend};
use warden_test_utils::assertions::assert_struct_access_agrees;
use warden_test_utils::fixtures::membership_status;
use warden_test_utils::generators::{arb_cache_value, arb_struct_value, arb_scalar};
use warden_test_utils::{CountingKvStore, FailingKvStore};

fn walk_structs(value: &CacheValue) {
    match value {
        CacheValue::Struct(fields) => {
            assert_struct_access_agrees(value);
            fields.values().for_each(walk_structs);
        }
        CacheValue::Array(items) => items.iter().for_each(walk_structs),
        CacheValue::Object(map) => map.values().for_each(walk_structs),
        _ => {}
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_normalize_round_trip(value in arb_cache_value()) {
        let back = denormalize(normalize(&value)).expect("denormalize should succeed");
        prop_assert_eq!(&back, &value);
    }

    #[test]
    fn prop_string_round_trip_preserves_struct_access(value in arb_cache_value()) {
        let text = serde_json::to_string(&value).expect("serialize should succeed");
        let back: CacheValue = serde_json::from_str(&text).expect("deserialize should succeed");
        prop_assert_eq!(&back, &value);
        walk_structs(&back);
    }

    #[test]
    fn prop_struct_member_order_survives(fields in arb_struct_value(arb_scalar())) {
        let value = CacheValue::Struct(fields.clone());
        let text = serde_json::to_string(&value).expect("serialize should succeed");
        let back: CacheValue = serde_json::from_str(&text).expect("deserialize should succeed");

        let rebuilt = back.as_struct().expect("struct");
        prop_assert_eq!(rebuilt.names().collect::<Vec<_>>(), fields.names().collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_durable_adapter_round_trips_membership_fixture() {
    let kv = Arc::new(CountingKvStore::new());
    let storage: DurableStorage<CacheValue> = DurableStorage::new(
        kv.clone(),
        StorageConfig::new().with_key_prefix("membership:"),
        DurableOptions::new().with_local_cache(false),
    );
    let key = CacheKey::new("0xspace:0xuser");
    let value = membership_status(7);

    storage.set(&key, value.clone(), Some(Duration::from_secs(900))).await;
    let back = storage.get(&key).await.expect("value should be stored");

    assert_eq!(back, value);
    assert_struct_access_agrees(&back);
    assert_eq!(kv.puts(), 1);
    assert_eq!(kv.gets(), 1);
    assert!(kv.inner().contains_key("membership:0xspace:0xuser"));
}

#[tokio::test]
async fn test_store_outage_degrades_to_misses() {
    let kv = Arc::new(FailingKvStore::new());
    let storage: DurableStorage<CacheValue> =
        DurableStorage::new(kv.clone(), StorageConfig::default(), DurableOptions::default());
    let key = CacheKey::new("k");

    storage.set(&key, membership_status(1), None).await;
    assert!(storage.get(&key).await.is_none());
    storage.delete(&key).await;
    assert_eq!(kv.calls(), 3);
}
