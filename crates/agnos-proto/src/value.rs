//! The runtime value model.
//!
//! One tagged variant covers every type the packers can carry: scalars,
//! bytes, strings, datetimes, containers, self-describing maps, record
//! fields, and object references. Proxies appear only as opaque 64-bit ids;
//! a decoded value never holds an in-process reference back into a server's
//! object table, so reference cycles on the wire stay cycle-free in memory.
//!
//! Values have a total order (floats compare by [`f64::total_cmp`]) so they
//! can serve as elements of ordered sets and keys of ordered maps.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;

use crate::heteromap::HeteroMap;
use crate::time::DateTime;

/// A value any registered packer can produce or consume.
#[derive(Debug, Clone)]
pub enum Value {
    /// The singleton null marker (zero bytes on the wire).
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 8-bit integer.
    Int8(i8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// IEEE-754 double.
    Float(f64),
    /// Raw byte buffer.
    Buffer(Bytes),
    /// UTF-8 string.
    Str(String),
    /// UTC time point.
    Date(DateTime),
    /// Ordered sequence of elements.
    List(Vec<Value>),
    /// Set of distinct elements.
    Set(BTreeSet<Value>),
    /// Key-to-value mapping.
    Map(BTreeMap<Value, Value>),
    /// Self-describing heterogeneous map.
    Hetero(HeteroMap),
    /// Opaque reference to a server-resident object.
    ObjRef(i64),
    /// Fields of a generated record, in declaration order.
    Record(Vec<Value>),
}

impl Value {
    /// Short tag name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int8(_) => "int8",
            Self::Int16(_) => "int16",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Float(_) => "float",
            Self::Buffer(_) => "buffer",
            Self::Str(_) => "string",
            Self::Date(_) => "datetime",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Hetero(_) => "heteromap",
            Self::ObjRef(_) => "objref",
            Self::Record(_) => "record",
        }
    }

    /// Variant rank for cross-variant ordering.
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int8(_) => 2,
            Self::Int16(_) => 3,
            Self::Int32(_) => 4,
            Self::Int64(_) => 5,
            Self::Float(_) => 6,
            Self::Buffer(_) => 7,
            Self::Str(_) => 8,
            Self::Date(_) => 9,
            Self::List(_) => 10,
            Self::Set(_) => 11,
            Self::Map(_) => 12,
            Self::Hetero(_) => 13,
            Self::ObjRef(_) => 14,
            Self::Record(_) => 15,
        }
    }

    /// The boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The 32-bit integer payload, if this is an `Int32`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// The 64-bit integer payload, if this is an `Int64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// The float payload, if this is a `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// The string payload, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// The buffer payload, if this is a `Buffer`.
    pub fn as_buffer(&self) -> Option<&Bytes> {
        match self {
            Self::Buffer(v) => Some(v),
            _ => None,
        }
    }

    /// The object id, if this is an `ObjRef`.
    pub fn as_objref(&self) -> Option<i64> {
        match self {
            Self::ObjRef(v) => Some(*v),
            _ => None,
        }
    }

    /// The heterogeneous map, if this is a `Hetero`.
    pub fn as_hetero(&self) -> Option<&HeteroMap> {
        match self {
            Self::Hetero(v) => Some(v),
            _ => None,
        }
    }

    /// The element vector, if this is a `List`.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// The record fields, if this is a `Record`.
    pub fn as_record(&self) -> Option<&[Value]> {
        match self {
            Self::Record(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int8(a), Self::Int8(b)) => a.cmp(b),
            (Self::Int16(a), Self::Int16(b)) => a.cmp(b),
            (Self::Int32(a), Self::Int32(b)) => a.cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Buffer(a), Self::Buffer(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a.cmp(b),
            (Self::Set(a), Self::Set(b)) => a.cmp(b),
            (Self::Map(a), Self::Map(b)) => a.cmp(b),
            (Self::Hetero(a), Self::Hetero(b)) => a.cmp(b),
            (Self::ObjRef(a), Self::ObjRef(b)) => a.cmp(b),
            (Self::Record(a), Self::Record(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Self::Int8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::Buffer(v)
    }
}

impl From<DateTime> for Value {
    fn from(v: DateTime) -> Self {
        Self::Date(v)
    }
}

impl From<HeteroMap> for Value {
    fn from(v: HeteroMap) -> Self {
        Self::Hetero(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_order_totally() {
        let mut set = BTreeSet::new();
        set.insert(Value::Float(f64::NAN));
        set.insert(Value::Float(0.0));
        set.insert(Value::Float(-0.0));
        set.insert(Value::Float(f64::NAN));
        // NaN deduplicates; -0.0 and 0.0 are distinct under total_cmp
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn cross_variant_ordering_is_stable() {
        assert!(Value::Null < Value::Bool(false));
        assert!(Value::Int32(i32::MAX) < Value::Int64(i64::MIN));
        assert_ne!(Value::Int32(1), Value::Int64(1));
    }
}
