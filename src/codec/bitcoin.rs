//! Bitcoin-family derived descriptors
//!
//! Descriptors for the wire structures the pool protocol shares with
//! Bitcoin: compact difficulty targets, transactions (classic and BIP-141
//! witness form), block headers, blocks, and peer addresses, plus the
//! double-SHA256 helper the checksummed envelope and the framing layer use.

use std::fmt;
use std::sync::OnceLock;

use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use crate::codec::error::CodecError;
use crate::codec::types::{Endian, WireReader, WireType};
use crate::codec::value::{Record, Value};
use crate::record;

/// Double SHA-256.
pub fn hash256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Bitcoin's compact difficulty encoding: a 32-bit word whose top byte is a
/// base-256 exponent and whose low three bytes are the mantissa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatingInteger {
    bits: u32,
}

impl FloatingInteger {
    pub fn new(bits: u32) -> Self {
        Self { bits }
    }

    /// Raw 32-bit wire form.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// The 256-bit threshold this compact word expands to.
    pub fn target(&self) -> BigUint {
        let exponent = self.bits >> 24;
        let mantissa = BigUint::from(self.bits & 0x00ff_ffff);
        if exponent >= 3 {
            mantissa << (8 * (exponent - 3))
        } else {
            mantissa >> (8 * (3 - exponent))
        }
    }
}

impl fmt::Display for FloatingInteger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FloatingInteger(bits={:#010x}, target={:#x})",
            self.bits,
            self.target()
        )
    }
}

pub(crate) fn read_floating_integer(r: &mut WireReader<'_>) -> Result<Value, CodecError> {
    let b = r.take(4)?;
    let bits = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    Ok(Value::Compact(FloatingInteger::new(bits)))
}

pub(crate) fn write_floating_integer(w: &mut Vec<u8>, value: &Value) -> Result<(), CodecError> {
    let compact = value.as_compact().ok_or(CodecError::TypeMismatch {
        expected: "compact",
        got: value.kind(),
    })?;
    w.extend_from_slice(&compact.bits().to_le_bytes());
    Ok(())
}

/// Coinbase inputs spend no previous output; the all-ones index together
/// with a zero hash is the wire sentinel for that absence.
pub fn previous_output_type() -> &'static WireType {
    static TYPE: OnceLock<WireType> = OnceLock::new();
    TYPE.get_or_init(|| {
        WireType::optional(
            Value::Record(record! { "hash" => 0u8, "index" => 0xffff_ffffu32 }),
            WireType::composite([
                ("hash", WireType::int(256, Endian::Little)),
                ("index", WireType::int(32, Endian::Little)),
            ]),
        )
    })
}

pub fn tx_in_type() -> &'static WireType {
    static TYPE: OnceLock<WireType> = OnceLock::new();
    TYPE.get_or_init(|| {
        WireType::composite([
            ("previous_output", previous_output_type().clone()),
            ("script", WireType::VarStr),
            // all-ones sequence means "final" and decodes as absent
            (
                "sequence",
                WireType::optional(
                    Value::from(0xffff_ffffu32),
                    WireType::int(32, Endian::Little),
                ),
            ),
        ])
    })
}

pub fn tx_out_type() -> &'static WireType {
    static TYPE: OnceLock<WireType> = OnceLock::new();
    TYPE.get_or_init(|| {
        WireType::composite([
            ("value", WireType::int(64, Endian::Little)),
            ("script", WireType::VarStr),
        ])
    })
}

/// One per-input witness stack.
pub fn witness_type() -> &'static WireType {
    static TYPE: OnceLock<WireType> = OnceLock::new();
    TYPE.get_or_init(|| WireType::list(WireType::VarStr))
}

fn tx_in_list_type() -> &'static WireType {
    static TYPE: OnceLock<WireType> = OnceLock::new();
    TYPE.get_or_init(|| WireType::list(tx_in_type().clone()))
}

fn tx_out_list_type() -> &'static WireType {
    static TYPE: OnceLock<WireType> = OnceLock::new();
    TYPE.get_or_init(|| WireType::list(tx_out_type().clone()))
}

fn int32_le() -> &'static WireType {
    static TYPE: OnceLock<WireType> = OnceLock::new();
    TYPE.get_or_init(|| WireType::int(32, Endian::Little))
}

fn int8() -> &'static WireType {
    static TYPE: OnceLock<WireType> = OnceLock::new();
    TYPE.get_or_init(|| WireType::int(8, Endian::Little))
}

/// Transaction decode. A zero byte where the input count would start marks
/// the BIP-141 extended form: marker, flag, inputs, outputs, one witness
/// stack per input (the outer count is the input count and is not encoded),
/// lock time. Any other byte starts the classic input list.
pub(crate) fn read_transaction(r: &mut WireReader<'_>) -> Result<Value, CodecError> {
    let version = int32_le().read(r)?;
    let mut record = Record::new();
    record.insert("version", version);

    if r.peek_u8()? == 0 {
        r.take(1)?; // marker
        let flag = int8().read(r)?;
        let tx_ins = tx_in_list_type().read(r)?;
        let tx_outs = tx_out_list_type().read(r)?;
        let input_count = tx_ins.as_list().map(<[Value]>::len).unwrap_or(0);
        let mut witness = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            witness.push(witness_type().read(r)?);
        }
        let lock_time = int32_le().read(r)?;

        record.insert("marker", 0u8);
        record.insert("flag", flag);
        record.insert("tx_ins", tx_ins);
        record.insert("tx_outs", tx_outs);
        record.insert("witness", Value::List(witness));
        record.insert("lock_time", lock_time);
    } else {
        let tx_ins = tx_in_list_type().read(r)?;
        let tx_outs = tx_out_list_type().read(r)?;
        let lock_time = int32_le().read(r)?;

        record.insert("tx_ins", tx_ins);
        record.insert("tx_outs", tx_outs);
        record.insert("lock_time", lock_time);
    }

    Ok(Value::Record(record))
}

pub(crate) fn write_transaction(w: &mut Vec<u8>, value: &Value) -> Result<(), CodecError> {
    let record = value.as_record().ok_or(CodecError::TypeMismatch {
        expected: "record",
        got: value.kind(),
    })?;
    let field = |name: &str| {
        record
            .get(name)
            .ok_or_else(|| CodecError::MissingField(name.to_string()))
    };

    int32_le().write(w, field("version")?)?;

    if record.contains_key("marker") && record.contains_key("flag") {
        int8().write(w, field("marker")?)?;
        int8().write(w, field("flag")?)?;
        let tx_ins = field("tx_ins")?;
        tx_in_list_type().write(w, tx_ins)?;
        tx_out_list_type().write(w, field("tx_outs")?)?;

        let input_count = tx_ins.as_list().map(<[Value]>::len).unwrap_or(0);
        let witness = field("witness")?;
        let stacks = witness.as_list().ok_or(CodecError::TypeMismatch {
            expected: "list",
            got: witness.kind(),
        })?;
        if stacks.len() != input_count {
            return Err(CodecError::OutOfRange(format!(
                "{} witness stacks for {input_count} inputs",
                stacks.len()
            )));
        }
        for stack in stacks {
            witness_type().write(w, stack)?;
        }
        int32_le().write(w, field("lock_time")?)?;
    } else {
        tx_in_list_type().write(w, field("tx_ins")?)?;
        tx_out_list_type().write(w, field("tx_outs")?)?;
        int32_le().write(w, field("lock_time")?)?;
    }

    Ok(())
}

/// Header `previous_block` uses a zero hash as the no-parent sentinel.
pub fn block_header_type() -> &'static WireType {
    static TYPE: OnceLock<WireType> = OnceLock::new();
    TYPE.get_or_init(|| {
        WireType::composite([
            ("version", WireType::int(32, Endian::Little)),
            (
                "previous_block",
                WireType::optional(Value::from(0u8), WireType::int(256, Endian::Little)),
            ),
            ("merkle_root", WireType::int(256, Endian::Little)),
            ("timestamp", WireType::int(32, Endian::Little)),
            ("bits", WireType::FloatingInteger),
            ("nonce", WireType::int(32, Endian::Little)),
        ])
    })
}

pub fn block_type() -> &'static WireType {
    static TYPE: OnceLock<WireType> = OnceLock::new();
    TYPE.get_or_init(|| {
        WireType::composite([
            ("header", block_header_type().clone()),
            ("txs", WireType::list(WireType::Transaction)),
        ])
    })
}

/// Network address as carried in version and addr messages: service bits,
/// a 16-byte address slot, and a big-endian port.
pub fn address_type() -> &'static WireType {
    static TYPE: OnceLock<WireType> = OnceLock::new();
    TYPE.get_or_init(|| {
        WireType::composite([
            ("services", WireType::int(64, Endian::Little)),
            ("address", WireType::IpAddress),
            ("port", WireType::int(16, Endian::Big)),
        ])
    })
}

/// Hash of a transaction's classic (witness-stripped) encoding.
pub fn tx_id(tx: &Record) -> Result<BigUint, CodecError> {
    let mut stripped = tx.clone();
    if stripped.contains_key("marker") {
        let mut classic = Record::new();
        for name in ["version", "tx_ins", "tx_outs", "lock_time"] {
            let value = tx
                .get(name)
                .ok_or_else(|| CodecError::MissingField(name.to_string()))?;
            classic.insert(name, value.clone());
        }
        stripped = classic;
    }
    let packed = WireType::Transaction.pack(&Value::Record(stripped))?;
    Ok(BigUint::from_bytes_le(&hash256d(&packed)))
}

/// Hash of a block header, as a little-endian 256-bit integer.
pub fn header_hash(header: &Record) -> Result<BigUint, CodecError> {
    let packed = block_header_type().pack(&Value::Record(header.clone()))?;
    Ok(BigUint::from_bytes_le(&hash256d(&packed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash256d_matches_known_vector() {
        // sha256d("hello") from the Bitcoin wiki
        let digest = hash256d(b"hello");
        assert_eq!(
            hex::encode(digest),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn compact_target_expands_high_exponent() {
        let f = FloatingInteger::new(0x2100_8000);
        assert_eq!(f.target(), BigUint::from(1u8) << 255);
    }

    #[test]
    fn compact_target_shifts_down_for_small_exponent() {
        // exponent 1: mantissa is shifted right by two bytes
        let f = FloatingInteger::new(0x0101_0000);
        assert_eq!(f.target(), BigUint::from(1u8));
    }

    #[test]
    fn header_round_trips_with_genesis_style_sentinel() {
        let header = record! {
            "version" => 1u32,
            "previous_block" => Value::None,
            "merkle_root" => 1234u32,
            "timestamp" => 1_231_006_505u32,
            "bits" => FloatingInteger::new(0x1d00_ffff),
            "nonce" => 2_083_236_893u32,
        };
        let packed = block_header_type()
            .pack(&Value::Record(header.clone()))
            .unwrap();
        assert_eq!(packed.len(), 80);
        let decoded = block_header_type().unpack(&packed).unwrap();
        assert_eq!(decoded, Value::Record(header));
    }

    #[test]
    fn tx_id_ignores_witness_data() {
        let mut tx = record! {
            "version" => 1u32,
            "tx_ins" => vec![Value::Record(record! {
                "previous_output" => Value::None,
                "script" => b"script",
                "sequence" => Value::None,
            })],
            "tx_outs" => vec![Value::Record(record! {
                "value" => 50u64,
                "script" => b"out",
            })],
            "lock_time" => 0u32,
        };
        let classic_id = tx_id(&tx).unwrap();

        tx.insert("marker", 0u8);
        tx.insert("flag", 1u8);
        tx.insert(
            "witness",
            vec![Value::List(vec![Value::from(b"witness data")])],
        );
        assert_eq!(tx_id(&tx).unwrap(), classic_id);
    }
}
