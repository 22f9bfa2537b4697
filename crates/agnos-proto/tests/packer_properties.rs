//! Property-based tests for the packer layer.
//!
//! These verify the round-trip invariant for all valid inputs rather than
//! hand-picked examples: for every packer P and value v in its domain,
//! unpack(pack(v)) == v. A handful of golden byte tests pin the wire layout
//! itself so the properties cannot drift along with a codec bug.

use std::io::Cursor;

use agnos_proto::packers::{self, Packer};
use agnos_proto::{DateTime, HKey, HeteroMap, PackerRegistry, Value};
use bytes::Bytes;
use proptest::prelude::*;

fn round_trip(packer: &Packer, value: &Value) -> Value {
    let mut buf = Vec::new();
    packer.pack(value, &mut buf).expect("pack should succeed");
    packer
        .unpack(&mut Cursor::new(buf), &PackerRegistry::new())
        .expect("unpack should succeed")
}

/// Strategy producing a primitive packer together with a value in its domain.
fn primitive_pair() -> impl Strategy<Value = (Packer, Value)> {
    prop_oneof![
        any::<i8>().prop_map(|v| (Packer::Int8, Value::Int8(v))),
        any::<bool>().prop_map(|v| (Packer::Bool, Value::Bool(v))),
        any::<i16>().prop_map(|v| (Packer::Int16, Value::Int16(v))),
        any::<i32>().prop_map(|v| (Packer::Int32, Value::Int32(v))),
        any::<i64>().prop_map(|v| (Packer::Int64, Value::Int64(v))),
        any::<f64>().prop_map(|v| (Packer::Float, Value::Float(v))),
        prop::collection::vec(any::<u8>(), 0..256)
            .prop_map(|v| (Packer::Buffer, Value::Buffer(Bytes::from(v)))),
        any::<i64>().prop_map(|v| (Packer::Date, Value::Date(DateTime::from_micros(v / 2)))),
        ".{0,64}".prop_map(|v| (Packer::Str, Value::Str(v))),
        Just((Packer::Null, Value::Null)),
    ]
}

#[test]
fn prop_primitive_round_trip() {
    proptest!(|((packer, value) in primitive_pair())| {
        let decoded = round_trip(&packer, &value);
        // Bitwise for numerics (Value's float order is total), structural
        // for the rest
        prop_assert_eq!(decoded, value);
    });
}

#[test]
fn prop_list_round_trip() {
    proptest!(|(items in prop::collection::vec(any::<i64>(), 0..64))| {
        let packer = Packer::List(Box::new(Packer::Int64));
        let value = Value::List(items.into_iter().map(Value::Int64).collect());
        prop_assert_eq!(round_trip(&packer, &value), value);
    });
}

#[test]
fn prop_set_round_trip_deduplicates() {
    proptest!(|(items in prop::collection::btree_set(any::<i32>(), 0..64))| {
        let packer = Packer::Set(Box::new(Packer::Int32));
        let value = Value::Set(items.into_iter().map(Value::Int32).collect());
        prop_assert_eq!(round_trip(&packer, &value), value);
    });
}

#[test]
fn prop_map_round_trip() {
    proptest!(|(entries in prop::collection::btree_map(".{0,16}", any::<i32>(), 0..32))| {
        let packer = Packer::Map(Box::new(Packer::Str), Box::new(Packer::Int32));
        let value = Value::Map(
            entries.into_iter().map(|(k, v)| (Value::Str(k), Value::Int32(v))).collect(),
        );
        prop_assert_eq!(round_trip(&packer, &value), value);
    });
}

/// Strategy producing a HeteroMap key of each permitted kind.
fn arbitrary_hkey() -> impl Strategy<Value = HKey> {
    prop_oneof![
        any::<bool>().prop_map(HKey::Bool),
        any::<i32>().prop_map(HKey::Int32),
        any::<i64>().prop_map(HKey::Int64),
        any::<f64>().prop_map(HKey::Float),
        ".{0,24}".prop_map(HKey::Str),
        any::<i32>().prop_map(|v| HKey::Date(DateTime::from_micros(i64::from(v)))),
    ]
}

#[test]
fn prop_heteromap_round_trip() {
    proptest!(|(entries in prop::collection::vec((arbitrary_hkey(), any::<i64>()), 0..24))| {
        let mut map = HeteroMap::new();
        for (key, v) in entries {
            map.put_i64(key, v);
        }

        let packer = Packer::HeteroMap;
        let decoded = round_trip(&packer, &Value::Hetero(map.clone()));
        prop_assert_eq!(decoded, Value::Hetero(map));
    });
}

#[test]
fn prop_truncated_payloads_never_panic() {
    proptest!(|(items in prop::collection::vec(any::<i32>(), 1..16), cut in 1usize..8)| {
        let packer = Packer::List(Box::new(Packer::Int32));
        let value = Value::List(items.into_iter().map(Value::Int32).collect());
        let mut buf = Vec::new();
        packer.pack(&value, &mut buf).expect("pack should succeed");

        let cut = cut.min(buf.len() - 1);
        let truncated = &buf[..buf.len() - cut];
        let result = packer.unpack(&mut Cursor::new(truncated), &PackerRegistry::new());
        prop_assert!(result.is_err());
    });
}

#[test]
fn golden_primitive_wire_bytes() {
    let mut buf = Vec::new();
    packers::pack_i16(-2, &mut buf).expect("pack");
    packers::pack_i32(0x0102_0304, &mut buf).expect("pack");
    packers::pack_i64(0x1234, &mut buf).expect("pack");
    packers::pack_str("hi", &mut buf).expect("pack");

    assert_eq!(
        hex::encode(&buf),
        concat!(
            "fffe",             // int16 -2
            "01020304",         // int32, big-endian
            "0000000000001234", // int64 object-id style
            "000000026869",     // "hi" with int32 length prefix
        )
    );
}

#[test]
fn golden_info_map_entry() {
    let mut map = HeteroMap::new();
    map.put_i32("INFO_META", 0);

    let mut buf = Vec::new();
    Packer::HeteroMap.pack(&Value::Hetero(map), &mut buf).expect("pack");

    assert_eq!(
        hex::encode(&buf),
        concat!(
            "00000001", // one entry
            "00000009", // key packer: string
            "00000009", // key length
            "494e464f5f4d455441",
            "00000004", // value packer: int32
            "00000000", // INFO_META code
        )
    );
}

#[test]
fn golden_info_map_round_trip() {
    let mut map = HeteroMap::new();
    map.put_i32("INFO_META", 0);
    map.put_i32("INFO_GENERAL", 1);
    map.put_i32("INFO_FUNCTIONS", 2);
    map.put_i32("INFO_FUNCCODES", 3);

    let mut buf = Vec::new();
    Packer::HeteroMap.pack(&Value::Hetero(map.clone()), &mut buf).expect("pack");
    assert_eq!(&buf[..4], &[0, 0, 0, 4]);

    let decoded = Packer::HeteroMap
        .unpack(&mut Cursor::new(buf), &PackerRegistry::new())
        .expect("unpack");
    assert_eq!(decoded, Value::Hetero(map));
}
