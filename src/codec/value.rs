//! Decoded wire values and field-name-keyed records.
//!
//! Every descriptor reads into a [`Value`] and writes from one. Composite
//! descriptors read into a [`Record`], a single record type keyed by field
//! name: access is by name, equality is order-insensitive, and a record
//! compares equal to a plain map with the same keys and values.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;
use std::sync::OnceLock;

use num_bigint::BigUint;

use crate::codec::bitcoin::FloatingInteger;
use crate::codec::types::WireType;

/// A decoded wire value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Absent optional value.
    None,
    /// Unsigned integer of any wire width.
    Int(BigUint),
    /// Raw byte string (VarStr / FixedStr payloads).
    Bytes(Vec<u8>),
    /// Textual value: enum symbols and IP addresses.
    Text(String),
    /// Homogeneous list.
    List(Vec<Value>),
    /// Composite record.
    Record(Record),
    /// Compact difficulty target.
    Compact(FloatingInteger),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Int(_) => "int",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Compact(_) => "compact",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_int(&self) -> Option<&BigUint> {
        match self {
            Value::Int(n) => Some(n),
            _ => None,
        }
    }

    /// Integer value narrowed to `u64`, when it fits.
    pub fn as_u64(&self) -> Option<u64> {
        use num_traits::ToPrimitive;
        self.as_int().and_then(|n| n.to_u64())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_compact(&self) -> Option<FloatingInteger> {
        match self {
            Value::Compact(f) => Some(*f),
            _ => None,
        }
    }
}

macro_rules! int_value_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(BigUint::from(v))
            }
        })*
    };
}

int_value_from!(u8, u16, u32, u64, u128, usize);

impl From<BigUint> for Value {
    fn from(v: BigUint) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Value {
    fn from(v: &[u8; N]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(v)
    }
}

impl From<FloatingInteger> for Value {
    fn from(v: FloatingInteger) -> Self {
        Value::Compact(v)
    }
}

/// A composite value keyed by field name.
///
/// Fields keep their declaration order for encoding, but equality and
/// lookup are order-insensitive. A record may cache its own packed size
/// paired with the descriptor that produced it, so repeated size queries
/// do not repack.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
    packed_size: OnceLock<(WireType, usize)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut record = Record::new();
        for (key, value) in pairs {
            record.insert(key, value);
        }
        record
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Set a field, replacing any existing value under the same name.
    /// Mutation invalidates the cached packed size.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        self.packed_size = OnceLock::new();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn cached_packed_size(&self, ty: &WireType) -> Option<usize> {
        match self.packed_size.get() {
            Some((cached_ty, size)) if cached_ty == ty => Some(*size),
            _ => None,
        }
    }

    pub(crate) fn cache_packed_size(&self, ty: &WireType, size: usize) {
        let _ = self.packed_size.set((ty.clone(), size));
    }
}

impl Index<&str> for Record {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        match self.get(key) {
            Some(value) => value,
            None => panic!("no field named {key:?}"),
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key) == Some(value))
    }
}

impl Eq for Record {}

impl PartialEq<BTreeMap<String, Value>> for Record {
    fn eq(&self, other: &BTreeMap<String, Value>) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key) == Some(value))
    }
}

impl PartialEq<Record> for BTreeMap<String, Value> {
    fn eq(&self, other: &Record) -> bool {
        other == self
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}: {value:?}")?;
        }
        write!(f, "}}")
    }
}

/// Build a [`Record`] from `"name" => value` pairs.
///
/// ```
/// use poolwire::record;
///
/// let out = record! { "value" => 8u64, "script" => b"hello!" };
/// assert_eq!(out["value"].as_u64(), Some(8));
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::codec::Record::new() };
    ($($key:literal => $value:expr),+ $(,)?) => {{
        let mut record = $crate::codec::Record::new();
        $(record.insert($key, $crate::codec::Value::from($value));)+
        record
    }};
}
