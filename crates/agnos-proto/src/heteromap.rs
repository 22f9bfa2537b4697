//! Self-describing heterogeneous map.
//!
//! A [`HeteroMap`] entry carries its key, its value, and the wire ids of the
//! packers that serialize them, making the encoded form self-describing:
//!
//! ```text
//! int32 count
//! per entry: int32 key_packer_id, key bytes, int32 val_packer_id, val bytes
//! ```
//!
//! Keys are restricted to {bool, int32, int64, float, string, datetime};
//! values may be anything a resolvable packer can carry. Decoding resolves
//! ids through the [`PackerRegistry`], so stub-registered packers work inside
//! metadata payloads too.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use bytes::Bytes;

use crate::errors::PackerError;
use crate::packers::{self, Packer};
use crate::registry::PackerRegistry;
use crate::time::DateTime;
use crate::value::Value;

/// A key of a [`HeteroMap`].
///
/// The total order (floats by [`f64::total_cmp`]) gives the map a stable
/// iteration order within a process, though no order is promised on the wire.
#[derive(Debug, Clone)]
pub enum HKey {
    /// Boolean key.
    Bool(bool),
    /// 32-bit integer key.
    Int32(i32),
    /// 64-bit integer key.
    Int64(i64),
    /// Float key.
    Float(f64),
    /// String key.
    Str(String),
    /// Datetime key.
    Date(DateTime),
}

impl HKey {
    /// The packer this key kind serializes with by default.
    pub fn default_packer(&self) -> Packer {
        match self {
            Self::Bool(_) => Packer::Bool,
            Self::Int32(_) => Packer::Int32,
            Self::Int64(_) => Packer::Int64,
            Self::Float(_) => Packer::Float,
            Self::Str(_) => Packer::Str,
            Self::Date(_) => Packer::Date,
        }
    }

    /// The key as a [`Value`], for handing to a packer.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Bool(v) => Value::Bool(*v),
            Self::Int32(v) => Value::Int32(*v),
            Self::Int64(v) => Value::Int64(*v),
            Self::Float(v) => Value::Float(*v),
            Self::Str(v) => Value::Str(v.clone()),
            Self::Date(v) => Value::Date(*v),
        }
    }

    /// Narrow a decoded value to a key; errors when the value's tag is
    /// outside the permitted key set.
    pub fn from_value(value: Value) -> Result<Self, PackerError> {
        match value {
            Value::Bool(v) => Ok(Self::Bool(v)),
            Value::Int32(v) => Ok(Self::Int32(v)),
            Value::Int64(v) => Ok(Self::Int64(v)),
            Value::Float(v) => Ok(Self::Float(v)),
            Value::Str(v) => Ok(Self::Str(v)),
            Value::Date(v) => Ok(Self::Date(v)),
            other => Err(PackerError::InvalidKey(other.kind())),
        }
    }

    /// Whether `packer` can legally serialize this key.
    fn accepts(&self, packer: &Packer) -> bool {
        matches!(
            (self, packer),
            (Self::Bool(_), Packer::Bool)
                | (Self::Int32(_), Packer::Int32)
                | (Self::Int64(_), Packer::Int64)
                | (Self::Float(_), Packer::Float)
                | (Self::Str(_), Packer::Str)
                | (Self::Date(_), Packer::Date)
        )
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int32(_) => 1,
            Self::Int64(_) => 2,
            Self::Float(_) => 3,
            Self::Str(_) => 4,
            Self::Date(_) => 5,
        }
    }
}

impl PartialEq for HKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HKey {}

impl PartialOrd for HKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int32(a), Self::Int32(b)) => a.cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<bool> for HKey {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for HKey {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for HKey {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for HKey {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for HKey {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for HKey {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<DateTime> for HKey {
    fn from(v: DateTime) -> Self {
        Self::Date(v)
    }
}

/// One entry: the value plus the packers declared for key and value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    key_packer: Packer,
    value: Value,
    val_packer: Packer,
}

/// A map whose entries carry their packers inline.
///
/// Replacing a key replaces both its value and its declared packers.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct HeteroMap {
    entries: BTreeMap<HKey, Entry>,
}

impl HeteroMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: impl Into<HKey>) -> bool {
        self.entries.contains_key(&key.into())
    }

    /// Associate `key` with `value` under explicitly chosen packers.
    pub fn put(
        &mut self,
        key: impl Into<HKey>,
        key_packer: Packer,
        value: Value,
        val_packer: Packer,
    ) {
        self.entries.insert(key.into(), Entry { key_packer, value, val_packer });
    }

    /// Put a bool value.
    pub fn put_bool(&mut self, key: impl Into<HKey>, value: bool) {
        self.put_with_default_key(key, Value::Bool(value), Packer::Bool);
    }

    /// Put an int32 value.
    pub fn put_i32(&mut self, key: impl Into<HKey>, value: i32) {
        self.put_with_default_key(key, Value::Int32(value), Packer::Int32);
    }

    /// Put an int64 value.
    pub fn put_i64(&mut self, key: impl Into<HKey>, value: i64) {
        self.put_with_default_key(key, Value::Int64(value), Packer::Int64);
    }

    /// Put a float value.
    pub fn put_f64(&mut self, key: impl Into<HKey>, value: f64) {
        self.put_with_default_key(key, Value::Float(value), Packer::Float);
    }

    /// Put a string value.
    pub fn put_str(&mut self, key: impl Into<HKey>, value: impl Into<String>) {
        self.put_with_default_key(key, Value::Str(value.into()), Packer::Str);
    }

    /// Put a buffer value.
    pub fn put_buffer(&mut self, key: impl Into<HKey>, value: Bytes) {
        self.put_with_default_key(key, Value::Buffer(value), Packer::Buffer);
    }

    /// Put a datetime value.
    pub fn put_date(&mut self, key: impl Into<HKey>, value: DateTime) {
        self.put_with_default_key(key, Value::Date(value), Packer::Date);
    }

    fn put_with_default_key(&mut self, key: impl Into<HKey>, value: Value, val_packer: Packer) {
        let key = key.into();
        let key_packer = key.default_packer();
        self.entries.insert(key, Entry { key_packer, value, val_packer });
    }

    /// Look up a value.
    pub fn get(&self, key: impl Into<HKey>) -> Option<&Value> {
        self.entries.get(&key.into()).map(|entry| &entry.value)
    }

    /// Look up an int32 value.
    pub fn get_i32(&self, key: impl Into<HKey>) -> Option<i32> {
        self.get(key).and_then(Value::as_i32)
    }

    /// Look up a string value.
    pub fn get_str(&self, key: impl Into<HKey>) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Look up a bool value.
    pub fn get_bool(&self, key: impl Into<HKey>) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Remove an entry, returning its value.
    pub fn remove(&mut self, key: impl Into<HKey>) -> Option<Value> {
        self.entries.remove(&key.into()).map(|entry| entry.value)
    }

    /// Iterate over keys and values.
    pub fn iter(&self) -> impl Iterator<Item = (&HKey, &Value)> {
        self.entries.iter().map(|(key, entry)| (key, &entry.value))
    }
}

/// Encode a map, entry packers inline. Each value is encoded exactly once.
pub(crate) fn pack(map: &HeteroMap, w: &mut dyn Write) -> Result<(), PackerError> {
    let count = i32::try_from(map.entries.len()).map_err(|_| PackerError::Oversize(map.len()))?;
    packers::pack_i32(count, w)?;

    for (key, entry) in &map.entries {
        if !key.accepts(&entry.key_packer) {
            return Err(PackerError::InvalidKey(entry.key_packer.name()));
        }
        let key_id =
            entry.key_packer.id().ok_or(PackerError::Unidentified(entry.key_packer.name()))?;
        packers::pack_i32(key_id, w)?;
        entry.key_packer.pack(&key.to_value(), w)?;

        let val_id =
            entry.val_packer.id().ok_or(PackerError::Unidentified(entry.val_packer.name()))?;
        packers::pack_i32(val_id, w)?;
        entry.val_packer.pack(&entry.value, w)?;
    }
    Ok(())
}

/// Decode a map, resolving every inline id through the registry.
pub(crate) fn unpack(r: &mut dyn Read, registry: &PackerRegistry) -> Result<HeteroMap, PackerError> {
    let count = packers::unpack_i32(r)?;
    if count < 0 {
        return Err(PackerError::NegativeCount(count));
    }

    let mut map = HeteroMap::new();
    for _ in 0..count {
        let key_id = packers::unpack_i32(r)?;
        let key_packer = registry.resolve(key_id).ok_or(PackerError::UnknownPackerId(key_id))?;
        let key = HKey::from_value(key_packer.unpack(r, registry)?)?;

        let val_id = packers::unpack_i32(r)?;
        let val_packer = registry.resolve(val_id).ok_or(PackerError::UnknownPackerId(val_id))?;
        let value = val_packer.unpack(r, registry)?;

        map.put(key, key_packer, value, val_packer);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn round_trip(map: &HeteroMap) -> HeteroMap {
        let mut buf = Vec::new();
        pack(map, &mut buf).unwrap();
        unpack(&mut Cursor::new(buf), &PackerRegistry::new()).unwrap()
    }

    #[test]
    fn every_key_kind_round_trips() {
        let mut map = HeteroMap::new();
        map.put_i32(true, 1);
        map.put_i32(17i32, 2);
        map.put_i32(17i64, 3);
        map.put_i32(2.5f64, 4);
        map.put_i32("seventeen", 5);
        map.put_i32(DateTime::from_unix_micros(1_000_000), 6);

        let decoded = round_trip(&map);
        assert_eq!(decoded, map);
        assert_eq!(decoded.get_i32("seventeen"), Some(5));
    }

    #[test]
    fn replacing_a_key_replaces_value_and_packers() {
        let mut map = HeteroMap::new();
        map.put_str("slot", "text");
        map.put_i64("slot", 42);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("slot"), Some(&Value::Int64(42)));
    }

    #[test]
    fn unknown_value_id_aborts_decoding() {
        let mut buf = Vec::new();
        packers::pack_i32(1, &mut buf).unwrap(); // one entry
        packers::pack_i32(9, &mut buf).unwrap(); // string key
        packers::pack_str("k", &mut buf).unwrap();
        packers::pack_i32(4321, &mut buf).unwrap(); // unregistered value id

        let err = unpack(&mut Cursor::new(buf), &PackerRegistry::new()).unwrap_err();
        assert!(matches!(err, PackerError::UnknownPackerId(4321)));
    }

    #[test]
    fn non_key_packer_is_rejected_at_serialization() {
        let mut map = HeteroMap::new();
        map.put("k", Packer::List(Box::new(Packer::Str)), Value::Int32(0), Packer::Int32);

        let mut buf = Vec::new();
        let err = pack(&map, &mut buf).unwrap_err();
        assert!(matches!(err, PackerError::InvalidKey("list")));
    }

    #[test]
    fn nested_maps_round_trip() {
        let mut inner = HeteroMap::new();
        inner.put_str("name", "agnos");

        let mut map = HeteroMap::new();
        map.put("meta", Packer::Str, Value::Hetero(inner.clone()), Packer::HeteroMap);

        let decoded = round_trip(&map);
        assert_eq!(decoded.get("meta"), Some(&Value::Hetero(inner)));
    }
}
