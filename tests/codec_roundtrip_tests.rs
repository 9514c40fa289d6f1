//! Round-trip and rejection tests for the wire codec
//!
//! Exercises every descriptor over its full domain: exhaustive sweeps for
//! the small domains, stepped sweeps for the wide integer widths, and
//! property tests for arbitrary payloads.

use num_bigint::BigUint;
use poolwire::codec::bitcoin::{tx_id, FloatingInteger};
use poolwire::codec::{CodecError, Endian, Value, WireType};
use poolwire::record;
use proptest::prelude::*;
use rand::Rng;

fn int_value(n: &BigUint) -> Value {
    Value::Int(n.clone())
}

#[test]
fn varint_round_trips_dense_and_sparse_ranges() {
    let t = WireType::VarInt;
    for i in 0u64..(1 << 20) {
        let v = Value::from(i);
        assert_eq!(t.unpack(&t.pack(&v).unwrap()).unwrap(), v);
    }
    for i in (1u64 << 36)..(1 << 36) + 25 {
        let v = Value::from(i);
        assert_eq!(t.unpack(&t.pack(&v).unwrap()).unwrap(), v);
    }
}

#[test]
fn varint_encoding_is_minimal() {
    let t = WireType::VarInt;
    assert_eq!(t.pack(&Value::from(0xfcu64)).unwrap(), vec![0xfc]);
    assert_eq!(t.pack(&Value::from(0xfdu64)).unwrap(), vec![0xfd, 0xfd, 0x00]);
    assert_eq!(
        t.pack(&Value::from(0x1_0000u64)).unwrap(),
        vec![0xfe, 0x00, 0x00, 0x01, 0x00]
    );
    assert_eq!(
        t.pack(&Value::from(0x1_0000_0000u64)).unwrap(),
        vec![0xff, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]
    );
}

#[test]
fn int_widths_round_trip_both_endiannesses() {
    for endian in [Endian::Little, Endian::Big] {
        let mut offset = 0u32;
        for bits in [8u32, 16, 32, 64, 128, 192, 256] {
            let t = WireType::int(bits, endian);
            let limit = BigUint::from(1u8) << bits;

            // boundary values
            for v in [
                BigUint::from(0u8),
                BigUint::from(1u8),
                BigUint::from(1u8) << (bits / 2),
                &limit - 2u8,
                &limit - 1u8,
            ] {
                let value = int_value(&v);
                let packed = t.pack(&value).unwrap();
                assert_eq!(packed.len(), (bits / 8) as usize);
                assert_eq!(t.unpack(&packed).unwrap(), value);
            }

            // out-of-range values are rejected on encode
            for v in [limit.clone(), &limit + 1u8] {
                assert!(matches!(
                    t.pack(&int_value(&v)),
                    Err(CodecError::OutOfRange(_))
                ));
            }

            // stepped sweep across the whole range
            let step = if bits < 16 {
                BigUint::from(1u8)
            } else {
                &limit >> 13u32
            };
            let mut num = BigUint::from(offset);
            offset += 1;
            while num < limit {
                let value = int_value(&num);
                assert_eq!(t.unpack(&t.pack(&value).unwrap()).unwrap(), value);
                num += &step;
            }
        }
    }
}

#[test]
fn varstr_round_trips_every_length_to_260() {
    let mut rng = rand::thread_rng();
    let t = WireType::VarStr;
    let mut msg: Vec<u8> = Vec::new();
    for _ in 0..260 {
        let v = Value::Bytes(msg.clone());
        assert_eq!(t.unpack(&t.pack(&v).unwrap()).unwrap(), v);
        msg.push(rng.gen_range(40..=126));
    }
}

#[test]
fn list_of_u32_round_trips_up_to_260_elements() {
    let mut rng = rand::thread_rng();
    let t = WireType::list(WireType::int(32, Endian::Little));
    let mut values: Vec<Value> = Vec::new();
    for _ in 0..260 {
        let v = Value::List(values.clone());
        assert_eq!(t.unpack(&t.pack(&v).unwrap()).unwrap(), v);
        values.push(Value::from(rng.gen::<u32>()));
    }
}

#[test]
fn grouped_list_requires_multiple_of_group() {
    let t = WireType::list_grouped(WireType::int(8, Endian::Little), 2);
    let ok = Value::List(vec![Value::from(1u8), Value::from(2u8)]);
    assert_eq!(t.unpack(&t.pack(&ok).unwrap()).unwrap(), ok);

    let odd = Value::List(vec![Value::from(1u8)]);
    assert!(matches!(t.pack(&odd), Err(CodecError::OutOfRange(_))));
}

#[test]
fn fixed_str_accepts_exact_length_only() {
    let mut rng = rand::thread_rng();
    let material: Vec<u8> = (0..270).map(|_| rng.gen_range(40..=126)).collect();
    for n in 0usize..260 {
        let t = WireType::fixed_str(n);
        for q in n.saturating_sub(2)..n + 2 {
            let v = Value::Bytes(material[..q].to_vec());
            if q == n {
                assert_eq!(t.unpack(&t.pack(&v).unwrap()).unwrap(), v);
            } else {
                assert!(matches!(t.pack(&v), Err(CodecError::OutOfRange(_))));
            }
        }
    }
}

#[test]
fn ip_addresses_round_trip() {
    let t = WireType::IpAddress;
    for addr in ["192.168.21.18", "dead:beef:0123:4567:89ab:cdef:fedc:0001"] {
        let v = Value::from(addr);
        let packed = t.pack(&v).unwrap();
        assert_eq!(packed.len(), 16);
        assert_eq!(t.unpack(&packed).unwrap(), v);
    }
}

#[test]
fn enum_bijection_and_unknown_values() {
    let t = WireType::enumeration(
        WireType::VarInt,
        [
            (Value::from(0u8), "zero"),
            (Value::from(1u8), "one"),
            (Value::from(7u8), "seven"),
        ],
    )
    .unwrap();

    for name in ["zero", "one", "seven"] {
        let v = Value::from(name);
        assert_eq!(t.unpack(&t.pack(&v).unwrap()).unwrap(), v);
    }

    // wire value outside the map
    assert!(matches!(
        t.unpack(&[9]),
        Err(CodecError::UnknownSymbol(_))
    ));
    // name outside the map
    assert!(matches!(
        t.pack(&Value::from("ninety")),
        Err(CodecError::UnknownSymbol(_))
    ));
}

#[test]
fn enum_rejects_duplicate_wire_values_at_construction() {
    let result = WireType::enumeration(
        WireType::VarInt,
        [(Value::from(1u8), "a"), (Value::from(1u8), "b")],
    );
    assert!(matches!(result, Err(CodecError::DuplicateEnumValue)));
}

#[test]
fn optional_sentinel_over_every_u8() {
    for sentinel in 0u16..256 {
        let t = WireType::optional(
            Value::from(sentinel as u8),
            WireType::int(8, Endian::Little),
        );

        assert_eq!(t.unpack(&t.pack(&Value::None).unwrap()).unwrap(), Value::None);
        assert!(matches!(
            t.pack(&Value::from(sentinel as u8)),
            Err(CodecError::SentinelReserved)
        ));

        for q in 0u16..256 {
            if q == sentinel {
                continue;
            }
            let v = Value::from(q as u8);
            assert_eq!(t.unpack(&t.pack(&v).unwrap()).unwrap(), v);
        }
    }
}

#[test]
fn checksummed_envelope_round_trips_and_rejects_tampering() {
    let t = WireType::checksummed(WireType::VarStr);
    let v = Value::from(b"foobar");
    let packed = t.pack(&v).unwrap();
    assert_eq!(t.unpack(&packed).unwrap(), v);

    for i in 0..packed.len() {
        let mut tampered = packed.clone();
        tampered[i] ^= 0x01;
        assert!(t.unpack(&tampered).is_err(), "byte {i} accepted");
    }
}

#[test]
fn checksummed_composite_round_trips() {
    let t = WireType::checksummed(WireType::composite([
        ("version", WireType::int(8, Endian::Little)),
        ("pubkey_hash", WireType::int(160, Endian::Little)),
    ]));
    let v = Value::Record(record! {
        "version" => 1u8,
        "pubkey_hash" => 1_234_567_890u64,
    });
    assert_eq!(t.unpack(&t.pack(&v).unwrap()).unwrap(), v);
}

#[test]
fn floating_integer_reports_bits_and_target() {
    // 0x21008000 transmitted little-endian
    let wire = [0x00, 0x80, 0x00, 0x21];
    let t = WireType::FloatingInteger;
    let decoded = t.unpack(&wire).unwrap();
    let compact = decoded.as_compact().unwrap();
    assert_eq!(compact.bits(), 0x2100_8000);
    assert_eq!(compact.target(), BigUint::from(1u8) << 255);
    assert_eq!(
        compact.to_string(),
        "FloatingInteger(bits=0x21008000, target=0x8000000000000000000000000000000000000000000000000000000000000000)"
    );
    assert_eq!(t.pack(&decoded).unwrap(), wire);
}

#[test]
fn floating_integer_round_trips() {
    let t = WireType::FloatingInteger;
    for bits in [1u32, (1 << 10) - 1, (1 << 30) - 1] {
        let v = Value::Compact(FloatingInteger::new(bits));
        assert_eq!(t.unpack(&t.pack(&v).unwrap()).unwrap(), v);
    }
}

fn sample_transaction() -> poolwire::Record {
    record! {
        "version" => 1u32,
        "tx_ins" => vec![Value::Record(record! {
            "previous_output" => Value::None,
            "script" => b"In script",
            "sequence" => Value::None,
        })],
        "tx_outs" => vec![Value::Record(record! {
            "value" => 8u64,
            "script" => b"hello!",
        })],
        "lock_time" => 0u32,
    }
}

#[test]
fn transaction_round_trips_without_witness() {
    let t = WireType::Transaction;
    let tx = Value::Record(sample_transaction());
    assert_eq!(t.unpack(&t.pack(&tx).unwrap()).unwrap(), tx);
}

#[test]
fn transaction_round_trips_with_witness() {
    let t = WireType::Transaction;
    let mut tx = sample_transaction();
    tx.insert("marker", 0u8);
    tx.insert("flag", 1u8);
    tx.insert(
        "witness",
        vec![Value::List(vec![Value::from(b"Witness data")])],
    );
    let tx = Value::Record(tx);
    assert_eq!(t.unpack(&t.pack(&tx).unwrap()).unwrap(), tx);
}

#[test]
fn witness_marker_changes_encoding_but_not_txid() {
    let t = WireType::Transaction;
    let classic = sample_transaction();
    let mut extended = classic.clone();
    extended.insert("marker", 0u8);
    extended.insert("flag", 1u8);
    extended.insert(
        "witness",
        vec![Value::List(vec![Value::from(b"Witness data")])],
    );

    let classic_bytes = t.pack(&Value::Record(classic.clone())).unwrap();
    let extended_bytes = t.pack(&Value::Record(extended.clone())).unwrap();
    assert_ne!(classic_bytes, extended_bytes);
    assert_eq!(extended_bytes[4], 0x00);
    assert_eq!(extended_bytes[5], 0x01);
    assert_eq!(tx_id(&classic).unwrap(), tx_id(&extended).unwrap());
}

#[test]
fn composite_wrong_value_shape_is_rejected() {
    let t = WireType::composite([
        ("one", WireType::int(8, Endian::Little)),
        ("two", WireType::VarStr),
    ]);
    let bad = Value::Record(record! { "one" => b"1", "two" => 2u8 });
    assert!(t.pack(&bad).is_err());
}

#[test]
fn packed_size_matches_encoding_length() {
    let t = WireType::composite([
        ("tag", WireType::int(16, Endian::Big)),
        ("body", WireType::VarStr),
        ("items", WireType::list(WireType::VarInt)),
    ]);
    let v = Value::Record(record! {
        "tag" => 7u16,
        "body" => b"sized",
        "items" => vec![Value::from(1u64), Value::from(0xfdu64)],
    });
    let expected = t.pack(&v).unwrap().len();
    assert_eq!(t.packed_size(&v).unwrap(), expected);
    // second query hits the record's cache
    assert_eq!(t.packed_size(&v).unwrap(), expected);
}

proptest! {
    #[test]
    fn prop_varstr_round_trips(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
        let t = WireType::VarStr;
        let v = Value::Bytes(payload);
        prop_assert_eq!(t.unpack(&t.pack(&v).unwrap()).unwrap(), v);
    }

    #[test]
    fn prop_varint_round_trips(n in any::<u64>()) {
        let t = WireType::VarInt;
        let v = Value::from(n);
        prop_assert_eq!(t.unpack(&t.pack(&v).unwrap()).unwrap(), v);
    }

    #[test]
    fn prop_wide_int_round_trips(bytes in proptest::collection::vec(any::<u8>(), 32)) {
        let t = WireType::int(256, Endian::Little);
        let v = Value::Int(BigUint::from_bytes_le(&bytes));
        let packed = t.pack(&v).unwrap();
        prop_assert_eq!(&packed, &bytes);
        prop_assert_eq!(t.unpack(&packed).unwrap(), v);
    }

    #[test]
    fn prop_canonical_reencoding(payload in proptest::collection::vec(any::<u8>(), 0..64)) {
        // write(read(b)) == b for canonically produced input
        let t = WireType::list(WireType::VarStr);
        let v = Value::List(vec![Value::Bytes(payload)]);
        let packed = t.pack(&v).unwrap();
        let decoded = t.unpack(&packed).unwrap();
        prop_assert_eq!(t.pack(&decoded).unwrap(), packed);
    }
}
