//! Typed packers.
//!
//! A packer is a value codec with a numeric wire id. The well-known set
//! covers the scalar types, homogeneous containers over them, and the
//! self-describing [`HeteroMap`]; generated service stubs add record, enum
//! and proxy packers under ids of their own and register them in a
//! [`PackerRegistry`].
//!
//! All multi-byte integers are big-endian. Container payloads are a signed
//! 32-bit element count followed by the elements; decoders treat a negative
//! count as an error and never size allocations from the count alone, so a
//! hostile prefix cannot force a large allocation before the bytes actually
//! arrive.

use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;

use crate::errors::PackerError;
use crate::heteromap;
use crate::registry::PackerRegistry;
use crate::time::DateTime;
use crate::value::Value;

/// Wire id of the int8 packer.
pub const ID_INT8: i32 = 1;
/// Wire id of the bool packer.
pub const ID_BOOL: i32 = 2;
/// Wire id of the int16 packer.
pub const ID_INT16: i32 = 3;
/// Wire id of the int32 packer.
pub const ID_INT32: i32 = 4;
/// Wire id of the int64 packer.
pub const ID_INT64: i32 = 5;
/// Wire id of the float packer.
pub const ID_FLOAT: i32 = 6;
/// Wire id of the buffer packer.
pub const ID_BUFFER: i32 = 7;
/// Wire id of the datetime packer.
pub const ID_DATE: i32 = 8;
/// Wire id of the string packer.
pub const ID_STR: i32 = 9;
/// Wire id of the null packer.
pub const ID_NULL: i32 = 10;
/// Base id of the list-of-primitive packers (800..=808).
pub const ID_LIST_BASE: i32 = 800;
/// Base id of the set-of-primitive packers (820..=828).
pub const ID_SET_BASE: i32 = 820;
/// Wire id of the int32-to-int32 map packer.
pub const ID_MAP_INT32_INT32: i32 = 850;
/// Wire id of the int32-to-string map packer.
pub const ID_MAP_INT32_STR: i32 = 851;
/// Wire id of the string-to-int32 map packer.
pub const ID_MAP_STR_INT32: i32 = 852;
/// Wire id of the string-to-string map packer.
pub const ID_MAP_STR_STR: i32 = 853;
/// Wire id of the HeteroMap packer.
pub const ID_HETEROMAP: i32 = 998;

/// Initial capacity cap for decoded containers; growth past this is paid for
/// by bytes already consumed from the wire.
const CONTAINER_CAPACITY_CAP: usize = 1024;

/// Shape of a generated record, enum, or packed exception.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordType {
    /// Stub-assigned wire id; doubles as the class id for throwable records.
    pub id: i32,
    /// IDL-level type name.
    pub name: String,
    /// Field packers in declaration order.
    pub fields: Vec<Packer>,
    /// Whether this record crosses the wire as a packed exception.
    pub throwable: bool,
}

impl RecordType {
    /// Build a non-throwable record shape.
    pub fn new(id: i32, name: impl Into<String>, fields: Vec<Packer>) -> Arc<Self> {
        Arc::new(Self { id, name: name.into(), fields, throwable: false })
    }

    /// Build a throwable record shape (a packed exception class).
    pub fn throwable(id: i32, name: impl Into<String>, fields: Vec<Packer>) -> Arc<Self> {
        Arc::new(Self { id, name: name.into(), fields, throwable: true })
    }
}

/// A value codec identified by a numeric wire id.
///
/// `List`, `Set` and `Map` over non-primitive element packers have no
/// well-known id; stubs wrap them in [`Packer::Custom`] to assign one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Packer {
    /// 1 byte, two's complement.
    Int8,
    /// 1 byte, 0 or 1.
    Bool,
    /// 2 bytes, big-endian.
    Int16,
    /// 4 bytes, big-endian.
    Int32,
    /// 8 bytes, big-endian.
    Int64,
    /// IEEE-754 double, bitwise as int64 big-endian.
    Float,
    /// int32 length followed by raw bytes.
    Buffer,
    /// int64 microseconds since year 1.
    Date,
    /// int32 byte length followed by UTF-8 bytes.
    Str,
    /// Zero bytes; decodes to the null marker.
    Null,
    /// int32 count followed by count elements.
    List(Box<Packer>),
    /// Same wire form as `List`; container semantics differ.
    Set(Box<Packer>),
    /// int32 count followed by count key/value pairs.
    Map(Box<Packer>, Box<Packer>),
    /// Self-describing map; every entry carries its packer ids inline.
    HeteroMap,
    /// int64 object id; the id names a proxied interface.
    ObjRef(i32),
    /// Record fields in declaration order, no prefix.
    Record(Arc<RecordType>),
    /// A stub-assigned id wrapped around a composition without one.
    Custom {
        /// The stub-assigned wire id.
        id: i32,
        /// The packer doing the actual work.
        inner: Box<Packer>,
    },
}

impl Packer {
    /// The packer's wire id, or `None` for a composition that needs a
    /// [`Packer::Custom`] wrapper before it can appear in a HeteroMap.
    pub fn id(&self) -> Option<i32> {
        match self {
            Self::Int8 => Some(ID_INT8),
            Self::Bool => Some(ID_BOOL),
            Self::Int16 => Some(ID_INT16),
            Self::Int32 => Some(ID_INT32),
            Self::Int64 => Some(ID_INT64),
            Self::Float => Some(ID_FLOAT),
            Self::Buffer => Some(ID_BUFFER),
            Self::Date => Some(ID_DATE),
            Self::Str => Some(ID_STR),
            Self::Null => Some(ID_NULL),
            Self::List(elem) => elem.primitive_offset().map(|off| ID_LIST_BASE + off),
            Self::Set(elem) => elem.primitive_offset().map(|off| ID_SET_BASE + off),
            Self::Map(key, val) => match (key.as_ref(), val.as_ref()) {
                (Self::Int32, Self::Int32) => Some(ID_MAP_INT32_INT32),
                (Self::Int32, Self::Str) => Some(ID_MAP_INT32_STR),
                (Self::Str, Self::Int32) => Some(ID_MAP_STR_INT32),
                (Self::Str, Self::Str) => Some(ID_MAP_STR_STR),
                _ => None,
            },
            Self::HeteroMap => Some(ID_HETEROMAP),
            Self::ObjRef(id) => Some(*id),
            Self::Record(shape) => Some(shape.id),
            Self::Custom { id, .. } => Some(*id),
        }
    }

    /// Offset of a primitive packer within the list/set id blocks.
    fn primitive_offset(&self) -> Option<i32> {
        match self {
            Self::Int8 => Some(0),
            Self::Bool => Some(1),
            Self::Int16 => Some(2),
            Self::Int32 => Some(3),
            Self::Int64 => Some(4),
            Self::Float => Some(5),
            Self::Buffer => Some(6),
            Self::Date => Some(7),
            Self::Str => Some(8),
            _ => None,
        }
    }

    /// Short name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Bool => "bool",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float => "float",
            Self::Buffer => "buffer",
            Self::Date => "datetime",
            Self::Str => "string",
            Self::Null => "null",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(..) => "map",
            Self::HeteroMap => "heteromap",
            Self::ObjRef(_) => "objref",
            Self::Record(_) => "record",
            Self::Custom { .. } => "custom",
        }
    }

    /// Encode `value` into `w`.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` when the value's runtime tag is not the one this
    /// packer carries; I/O failures pass through.
    pub fn pack(&self, value: &Value, w: &mut dyn Write) -> Result<(), PackerError> {
        match (self, value) {
            (Self::Int8, Value::Int8(v)) => pack_i8(*v, w),
            (Self::Bool, Value::Bool(v)) => pack_bool(*v, w),
            (Self::Int16, Value::Int16(v)) => pack_i16(*v, w),
            (Self::Int32, Value::Int32(v)) => pack_i32(*v, w),
            (Self::Int64, Value::Int64(v)) => pack_i64(*v, w),
            (Self::Float, Value::Float(v)) => pack_f64(*v, w),
            (Self::Buffer, Value::Buffer(v)) => pack_bytes(v, w),
            (Self::Date, Value::Date(v)) => pack_date(*v, w),
            (Self::Str, Value::Str(v)) => pack_str(v, w),
            (Self::Null, Value::Null) => Ok(()),
            (Self::List(elem), Value::List(items)) => {
                pack_count(items.len(), w)?;
                for item in items {
                    elem.pack(item, w)?;
                }
                Ok(())
            }
            (Self::Set(elem), Value::Set(items)) => {
                pack_count(items.len(), w)?;
                for item in items {
                    elem.pack(item, w)?;
                }
                Ok(())
            }
            (Self::Map(key, val), Value::Map(entries)) => {
                pack_count(entries.len(), w)?;
                for (k, v) in entries {
                    key.pack(k, w)?;
                    val.pack(v, w)?;
                }
                Ok(())
            }
            (Self::HeteroMap, Value::Hetero(map)) => heteromap::pack(map, w),
            (Self::ObjRef(_), Value::ObjRef(oid)) => pack_i64(*oid, w),
            (Self::Record(shape), Value::Record(fields)) => {
                if fields.len() != shape.fields.len() {
                    return Err(PackerError::FieldCount {
                        name: shape.name.clone(),
                        expected: shape.fields.len(),
                        found: fields.len(),
                    });
                }
                for (packer, field) in shape.fields.iter().zip(fields) {
                    packer.pack(field, w)?;
                }
                Ok(())
            }
            (Self::Custom { inner, .. }, _) => inner.pack(value, w),
            _ => Err(PackerError::TypeMismatch { packer: self.name(), value: value.kind() }),
        }
    }

    /// Decode one value from `r`.
    ///
    /// The registry resolves the inline packer ids of HeteroMap entries;
    /// every other variant ignores it.
    pub fn unpack(
        &self,
        r: &mut dyn Read,
        registry: &PackerRegistry,
    ) -> Result<Value, PackerError> {
        match self {
            Self::Int8 => Ok(Value::Int8(unpack_i8(r)?)),
            Self::Bool => Ok(Value::Bool(unpack_bool(r)?)),
            Self::Int16 => Ok(Value::Int16(unpack_i16(r)?)),
            Self::Int32 => Ok(Value::Int32(unpack_i32(r)?)),
            Self::Int64 => Ok(Value::Int64(unpack_i64(r)?)),
            Self::Float => Ok(Value::Float(unpack_f64(r)?)),
            Self::Buffer => Ok(Value::Buffer(unpack_bytes(r)?)),
            Self::Date => Ok(Value::Date(unpack_date(r)?)),
            Self::Str => Ok(Value::Str(unpack_str(r)?)),
            Self::Null => Ok(Value::Null),
            Self::List(elem) => {
                let count = unpack_count(r)?;
                let mut items = Vec::with_capacity(count.min(CONTAINER_CAPACITY_CAP));
                for _ in 0..count {
                    items.push(elem.unpack(r, registry)?);
                }
                Ok(Value::List(items))
            }
            Self::Set(elem) => {
                let count = unpack_count(r)?;
                let mut items = std::collections::BTreeSet::new();
                for _ in 0..count {
                    items.insert(elem.unpack(r, registry)?);
                }
                Ok(Value::Set(items))
            }
            Self::Map(key, val) => {
                let count = unpack_count(r)?;
                let mut entries = std::collections::BTreeMap::new();
                for _ in 0..count {
                    let k = key.unpack(r, registry)?;
                    let v = val.unpack(r, registry)?;
                    entries.insert(k, v);
                }
                Ok(Value::Map(entries))
            }
            Self::HeteroMap => Ok(Value::Hetero(heteromap::unpack(r, registry)?)),
            Self::ObjRef(_) => Ok(Value::ObjRef(unpack_i64(r)?)),
            Self::Record(shape) => {
                let mut fields = Vec::with_capacity(shape.fields.len());
                for packer in &shape.fields {
                    fields.push(packer.unpack(r, registry)?);
                }
                Ok(Value::Record(fields))
            }
            Self::Custom { inner, .. } => inner.unpack(r, registry),
        }
    }
}

/// Encode an int8.
pub fn pack_i8(v: i8, w: &mut dyn Write) -> Result<(), PackerError> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

/// Encode a bool as one byte.
pub fn pack_bool(v: bool, w: &mut dyn Write) -> Result<(), PackerError> {
    pack_i8(i8::from(v), w)
}

/// Encode an int16, big-endian.
pub fn pack_i16(v: i16, w: &mut dyn Write) -> Result<(), PackerError> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

/// Encode an int32, big-endian.
pub fn pack_i32(v: i32, w: &mut dyn Write) -> Result<(), PackerError> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

/// Encode an int64, big-endian.
pub fn pack_i64(v: i64, w: &mut dyn Write) -> Result<(), PackerError> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

/// Encode a float bitwise as int64, big-endian.
pub fn pack_f64(v: f64, w: &mut dyn Write) -> Result<(), PackerError> {
    w.write_all(&v.to_bits().to_be_bytes())?;
    Ok(())
}

/// Encode a byte buffer: int32 length then the bytes.
pub fn pack_bytes(v: &[u8], w: &mut dyn Write) -> Result<(), PackerError> {
    pack_count(v.len(), w)?;
    w.write_all(v)?;
    Ok(())
}

/// Encode a string: int32 byte length then UTF-8 bytes.
pub fn pack_str(v: &str, w: &mut dyn Write) -> Result<(), PackerError> {
    pack_bytes(v.as_bytes(), w)
}

/// Encode a datetime as wire microseconds.
pub fn pack_date(v: DateTime, w: &mut dyn Write) -> Result<(), PackerError> {
    pack_i64(v.to_wire(), w)
}

/// Encode a container count as int32.
fn pack_count(len: usize, w: &mut dyn Write) -> Result<(), PackerError> {
    let count = i32::try_from(len).map_err(|_| PackerError::Oversize(len))?;
    pack_i32(count, w)
}

/// Decode an int8.
pub fn unpack_i8(r: &mut dyn Read) -> Result<i8, PackerError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(i8::from_be_bytes(buf))
}

/// Decode a bool; any non-zero byte is true.
pub fn unpack_bool(r: &mut dyn Read) -> Result<bool, PackerError> {
    Ok(unpack_i8(r)? != 0)
}

/// Decode an int16.
pub fn unpack_i16(r: &mut dyn Read) -> Result<i16, PackerError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(i16::from_be_bytes(buf))
}

/// Decode an int32.
pub fn unpack_i32(r: &mut dyn Read) -> Result<i32, PackerError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

/// Decode an int64.
pub fn unpack_i64(r: &mut dyn Read) -> Result<i64, PackerError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

/// Decode a float from its int64 bit pattern.
pub fn unpack_f64(r: &mut dyn Read) -> Result<f64, PackerError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_bits(u64::from_be_bytes(buf)))
}

/// Decode a length-prefixed byte buffer.
///
/// The buffer grows as bytes arrive rather than being sized from the
/// prefix, so a hostile length cannot force a huge allocation up front.
pub fn unpack_bytes(r: &mut dyn Read) -> Result<Bytes, PackerError> {
    let count = unpack_count(r)?;
    let mut buf = Vec::with_capacity(count.min(CONTAINER_CAPACITY_CAP));
    let got = r.take(count as u64).read_to_end(&mut buf)?;
    if got < count {
        return Err(PackerError::Eof);
    }
    Ok(Bytes::from(buf))
}

/// Decode a length-prefixed UTF-8 string.
pub fn unpack_str(r: &mut dyn Read) -> Result<String, PackerError> {
    let raw = unpack_bytes(r)?;
    Ok(String::from_utf8(raw.into())?)
}

/// Decode a datetime from wire microseconds.
pub fn unpack_date(r: &mut dyn Read) -> Result<DateTime, PackerError> {
    Ok(DateTime::from_wire(unpack_i64(r)?))
}

/// Decode a container count, rejecting negatives.
fn unpack_count(r: &mut dyn Read) -> Result<usize, PackerError> {
    let count = unpack_i32(r)?;
    if count < 0 {
        return Err(PackerError::NegativeCount(count));
    }
    Ok(count as usize)
}
