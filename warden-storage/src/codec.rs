//! Normalization of cache values for durable storage.
//!
//! Durable stores only hold strings, so every value crosses the boundary as
//! JSON. Plain JSON has no room for a sequence that also has named members,
//! so struct values are rewritten into tagged records before serialization:
//!
//! ```text
//! Struct [owner = "0xabc", tokenId = 42n]
//!   => { "__struct": true, "owner": "0xabc", "tokenId": { "__bigint": "42" } }
//! ```
//!
//! Member order is carried by the object's key order (serde_json is built
//! with `preserve_order`), which is how positions are restored on the way
//! back. Big integers are kept opaque: they are written through their decimal
//! form and never walked digit by digit.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use warden_core::StorageError;

use crate::value::{CacheValue, StructValue, BIGINT_TAG, STRUCT_TAG};

/// Rewrite a cache value into a plain, serializable JSON record.
pub fn normalize(value: &CacheValue) -> Value {
    match value {
        CacheValue::Null => Value::Null,
        CacheValue::Bool(b) => Value::Bool(*b),
        CacheValue::Number(n) => Value::Number(n.clone()),
        CacheValue::String(s) => Value::String(s.clone()),
        CacheValue::BigInt(n) => {
            let mut record = Map::with_capacity(1);
            record.insert(BIGINT_TAG.to_string(), Value::String(n.to_string()));
            Value::Object(record)
        }
        CacheValue::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        CacheValue::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), normalize(value)))
                .collect(),
        ),
        CacheValue::Struct(fields) => {
            let mut record = Map::with_capacity(fields.len() + 1);
            record.insert(STRUCT_TAG.to_string(), Value::Bool(true));
            for (name, value) in fields.iter() {
                record.insert(name.to_string(), normalize(value));
            }
            Value::Object(record)
        }
    }
}

/// Rebuild a cache value from a record produced by [`normalize`].
pub fn denormalize(record: Value) -> Result<CacheValue, StorageError> {
    Ok(match record {
        Value::Null => CacheValue::Null,
        Value::Bool(b) => CacheValue::Bool(b),
        Value::Number(n) => CacheValue::Number(n),
        Value::String(s) => CacheValue::String(s),
        Value::Array(items) => CacheValue::Array(
            items
                .into_iter()
                .map(denormalize)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(map) => denormalize_object(map)?,
    })
}

fn denormalize_object(map: Map<String, Value>) -> Result<CacheValue, StorageError> {
    if map.get(STRUCT_TAG) == Some(&Value::Bool(true)) {
        let fields = map
            .into_iter()
            .filter(|(name, _)| name != STRUCT_TAG)
            .map(|(name, value)| Ok((name, denormalize(value)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;
        return StructValue::new(fields).map(CacheValue::Struct);
    }

    if map.len() == 1 {
        if let Some(Value::String(digits)) = map.get(BIGINT_TAG) {
            let n = digits
                .parse::<BigInt>()
                .map_err(|e| StorageError::Deserialization {
                    reason: format!("invalid big integer {digits:?}: {e}"),
                })?;
            return Ok(CacheValue::BigInt(n));
        }
    }

    let object = map
        .into_iter()
        .map(|(key, value)| Ok((key, denormalize(value)?)))
        .collect::<Result<BTreeMap<_, _>, StorageError>>()?;
    Ok(CacheValue::Object(object))
}

impl Serialize for CacheValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        normalize(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CacheValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = Value::deserialize(deserializer)?;
        denormalize(record).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn membership_status() -> CacheValue {
        CacheValue::Struct(
            StructValue::new([
                ("isMember", CacheValue::Bool(true)),
                ("expiresAt", CacheValue::BigInt(BigInt::from(1_700_000_000_000u64))),
                ("wallets", CacheValue::Array(vec!["0x1".into(), "0x2".into()])),
            ])
            .expect("valid struct"),
        )
    }

    #[test]
    fn test_struct_normalizes_to_tagged_record() {
        let record = normalize(&membership_status());
        assert_eq!(
            record,
            json!({
                "__struct": true,
                "isMember": true,
                "expiresAt": { "__bigint": "1700000000000" },
                "wallets": ["0x1", "0x2"],
            })
        );
    }

    #[test]
    fn test_struct_order_survives_string_round_trip() {
        let value = membership_status();
        let text = serde_json::to_string(&value).expect("serialize");
        let back: CacheValue = serde_json::from_str(&text).expect("deserialize");

        let rebuilt = back.as_struct().expect("struct");
        assert_eq!(rebuilt.names().collect::<Vec<_>>(), ["isMember", "expiresAt", "wallets"]);
        assert_eq!(rebuilt[1], rebuilt["expiresAt"]);
        assert_eq!(back, value);
    }

    #[test]
    fn test_nested_structs_inside_arrays_and_objects() {
        let inner = CacheValue::Struct(
            StructValue::new([("id", CacheValue::from(1u64)), ("name", "a".into())])
                .expect("valid struct"),
        );
        let mut object = BTreeMap::new();
        object.insert("rules".to_string(), CacheValue::Array(vec![inner.clone(), inner]));
        object.insert("count".to_string(), CacheValue::BigInt(BigInt::from(-5)));
        let value = CacheValue::Object(object);

        let back = denormalize(normalize(&value)).expect("denormalize");
        assert_eq!(back, value);
    }

    #[test]
    fn test_negative_and_huge_bigints_stay_exact() {
        let huge: BigInt = "-115792089237316195423570985008687907853269984665640564039457584007913129639935"
            .parse()
            .expect("bigint");
        let value = CacheValue::BigInt(huge);
        assert_eq!(denormalize(normalize(&value)).expect("denormalize"), value);
    }

    #[test]
    fn test_invalid_bigint_digits_fail() {
        let err = denormalize(json!({ "__bigint": "12x" })).unwrap_err();
        assert!(matches!(err, StorageError::Deserialization { .. }));
    }

    #[test]
    fn test_plain_values_pass_through() {
        let record = json!({ "a": [1, 2.5, null, "s"], "b": false });
        let value = denormalize(record.clone()).expect("denormalize");
        assert!(matches!(value, CacheValue::Object(_)));
        assert_eq!(normalize(&value), record);
    }
}
