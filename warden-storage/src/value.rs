//! Dynamic cache values, including hybrid struct values.
//!
//! Typed contract-call results are commonly shaped as a tuple whose members
//! also carry names: the owner is both `result[0]` and `result["owner"]`.
//! [`StructValue`] models that shape explicitly, and [`CacheValue`] is the
//! tree of values a cached lookup can return.

use std::collections::BTreeMap;
use std::ops::Index;

use num_bigint::BigInt;
use warden_core::StorageError;

/// Field name reserved for the struct tag in the normalized form.
pub const STRUCT_TAG: &str = "__struct";

/// Field name reserved for arbitrary-precision integers in the normalized form.
pub const BIGINT_TAG: &str = "__bigint";

/// A value that can be cached and stored in a durable backend.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    /// Arbitrary-precision integer, stored as an opaque scalar.
    BigInt(BigInt),
    Array(Vec<CacheValue>),
    Object(BTreeMap<String, CacheValue>),
    /// Sequence with named members, accessible by index or by name.
    Struct(StructValue),
}

impl CacheValue {
    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Self::Struct(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<&BigInt> {
        match self {
            Self::BigInt(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[CacheValue]> {
        match self {
            Self::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for CacheValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for CacheValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for CacheValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<BigInt> for CacheValue {
    fn from(value: BigInt) -> Self {
        Self::BigInt(value)
    }
}

impl From<Vec<CacheValue>> for CacheValue {
    fn from(values: Vec<CacheValue>) -> Self {
        Self::Array(values)
    }
}

impl From<StructValue> for CacheValue {
    fn from(value: StructValue) -> Self {
        Self::Struct(value)
    }
}

/// An ordered sequence of named members.
///
/// Member names are unique, non-empty and never the reserved struct tag, so
/// the value survives normalization into a tagged record and back.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructValue {
    fields: Vec<(String, CacheValue)>,
}

impl StructValue {
    /// Build a struct value from `(name, value)` pairs in positional order.
    pub fn new<I, S>(fields: I) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = (S, CacheValue)>,
        S: Into<String>,
    {
        let mut built: Vec<(String, CacheValue)> = Vec::new();
        for (name, value) in fields {
            let name = name.into();
            if name.is_empty() {
                return Err(StorageError::InvalidValue {
                    reason: format!("struct member {} has an empty name", built.len()),
                });
            }
            if name == STRUCT_TAG {
                return Err(StorageError::InvalidValue {
                    reason: format!("struct member name {STRUCT_TAG} is reserved"),
                });
            }
            if built.iter().any(|(existing, _)| *existing == name) {
                return Err(StorageError::InvalidValue {
                    reason: format!("duplicate struct member name {name}"),
                });
            }
            built.push((name, value));
        }
        Ok(Self { fields: built })
    }

    /// Positional access.
    pub fn get(&self, index: usize) -> Option<&CacheValue> {
        self.fields.get(index).map(|(_, value)| value)
    }

    /// Named access.
    pub fn field(&self, name: &str) -> Option<&CacheValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Position of a named member.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(field, _)| field == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &CacheValue> {
        self.fields.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CacheValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl Index<usize> for StructValue {
    type Output = CacheValue;

    fn index(&self, index: usize) -> &Self::Output {
        &self.fields[index].1
    }
}

impl Index<&str> for StructValue {
    type Output = CacheValue;

    fn index(&self, name: &str) -> &Self::Output {
        match self.field(name) {
            Some(value) => value,
            None => panic!("struct has no member named {name}"),
        }
    }
}
