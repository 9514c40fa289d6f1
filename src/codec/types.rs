//! Wire-format descriptor algebra
//!
//! A [`WireType`] describes the byte layout of one value: it is both the
//! parser and the serializer for that layout. Descriptors are plain values
//! with structural equality and compose into arbitrarily nested shapes
//! (lists of composites of optionals, checksummed envelopes, and so on).
//!
//! Reads consume bytes from a [`WireReader`] cursor; underflow is a fatal
//! decode error. Writes append to a `Vec<u8>` sink and validate before
//! emitting anything. Top-level entry points are [`WireType::pack`],
//! [`WireType::unpack`], and [`WireType::packed_size`].

use std::sync::atomic::{AtomicBool, Ordering};

use num_bigint::BigUint;
use num_traits::ToPrimitive;

use crate::codec::bitcoin;
use crate::codec::error::CodecError;
use crate::codec::value::{Record, Value};

/// Process-wide repack self-check toggle.
///
/// When enabled, every top-level unpack re-encodes the decoded value and
/// compares it byte-for-byte against the input (prefix comparison when
/// trailing bytes are allowed). This is an explicit option rather than a
/// build-mode inference.
static DEBUG_CHECKS: AtomicBool = AtomicBool::new(false);

pub fn set_debug_checks(enabled: bool) {
    DEBUG_CHECKS.store(enabled, Ordering::Relaxed);
}

pub fn debug_checks_enabled() -> bool {
    DEBUG_CHECKS.load(Ordering::Relaxed)
}

/// Byte order of an integer descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Cursor over an input buffer.
#[derive(Debug)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Consume exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEnd {
                needed: n - self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn take_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8, CodecError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(CodecError::UnexpectedEnd { needed: 1 })
    }

    /// Bytes consumed between a saved position and the current one.
    pub fn consumed_since(&self, start: usize) -> &'a [u8] {
        &self.data[start..self.pos]
    }
}

/// Bijection between logical names and wire values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMap {
    inner: Box<WireType>,
    variants: Vec<(Value, String)>,
}

impl EnumMap {
    fn name_of(&self, wire: &Value) -> Option<&str> {
        self.variants
            .iter()
            .find(|(w, _)| w == wire)
            .map(|(_, name)| name.as_str())
    }

    fn wire_of(&self, name: &str) -> Option<&Value> {
        self.variants
            .iter()
            .find(|(_, n)| n == name)
            .map(|(w, _)| w)
    }
}

/// A wire-format descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireType {
    /// Fixed-width unsigned integer. `bits` is a positive multiple of 8;
    /// the semantic range is `[0, 2^bits)`.
    Int { bits: u32, endian: Endian },
    /// Bitcoin compact-size integer; decode rejects non-canonical forms.
    VarInt,
    /// VarInt length prefix followed by that many raw bytes.
    VarStr,
    /// Exactly `n` raw bytes.
    FixedStr(usize),
    /// VarInt element count, then `count * group` elements.
    List { elem: Box<WireType>, group: usize },
    /// Named wire values over an inner integer descriptor.
    Enum(EnumMap),
    /// Ordered `(name, descriptor)` fields; reads produce a [`Record`].
    Composite(Vec<(String, WireType)>),
    /// Inner descriptor whose sentinel value in the decoded domain means
    /// "absent".
    Optional {
        sentinel: Box<Value>,
        inner: Box<WireType>,
    },
    /// 16-byte slot holding an IPv6 address or an IPv4-mapped one.
    IpAddress,
    /// 32-bit compact difficulty target.
    FloatingInteger,
    /// Inner encoding followed by the first four bytes of its double-SHA256.
    Checksummed(Box<WireType>),
    /// Bitcoin transaction, classic or BIP-141 extended form.
    Transaction,
}

impl WireType {
    /// Integer descriptor. `bits` must be a positive multiple of 8.
    pub fn int(bits: u32, endian: Endian) -> Self {
        assert!(bits > 0 && bits % 8 == 0, "integer width must be a positive multiple of 8");
        WireType::Int { bits, endian }
    }

    pub fn fixed_str(len: usize) -> Self {
        WireType::FixedStr(len)
    }

    pub fn list(elem: WireType) -> Self {
        Self::list_grouped(elem, 1)
    }

    pub fn list_grouped(elem: WireType, group: usize) -> Self {
        assert!(group >= 1, "list group must be at least 1");
        WireType::List {
            elem: Box::new(elem),
            group,
        }
    }

    /// Enum over `(wire value, name)` pairs. Duplicate wire values or
    /// duplicate names are rejected.
    pub fn enumeration<I, S>(inner: WireType, pairs: I) -> Result<Self, CodecError>
    where
        I: IntoIterator<Item = (Value, S)>,
        S: Into<String>,
    {
        let mut variants: Vec<(Value, String)> = Vec::new();
        for (wire, name) in pairs {
            let name = name.into();
            if variants.iter().any(|(w, n)| *w == wire || *n == name) {
                return Err(CodecError::DuplicateEnumValue);
            }
            variants.push((wire, name));
        }
        Ok(WireType::Enum(EnumMap {
            inner: Box::new(inner),
            variants,
        }))
    }

    pub fn composite<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, WireType)>,
        S: Into<String>,
    {
        WireType::Composite(
            fields
                .into_iter()
                .map(|(name, ty)| (name.into(), ty))
                .collect(),
        )
    }

    pub fn optional(sentinel: Value, inner: WireType) -> Self {
        WireType::Optional {
            sentinel: Box::new(sentinel),
            inner: Box::new(inner),
        }
    }

    pub fn checksummed(inner: WireType) -> Self {
        WireType::Checksummed(Box::new(inner))
    }

    /// Field names of a composite descriptor.
    pub fn field_names(&self) -> Option<Vec<&str>> {
        match self {
            WireType::Composite(fields) => {
                Some(fields.iter().map(|(name, _)| name.as_str()).collect())
            }
            _ => None,
        }
    }

    /// Parse one value from the cursor.
    pub fn read(&self, r: &mut WireReader<'_>) -> Result<Value, CodecError> {
        match self {
            WireType::Int { bits, endian } => read_int(r, *bits, *endian),
            WireType::VarInt => Ok(Value::Int(BigUint::from(read_var_int(r)?))),
            WireType::VarStr => {
                let len = cast_len(read_var_int(r)?)?;
                Ok(Value::Bytes(r.take(len)?.to_vec()))
            }
            WireType::FixedStr(len) => Ok(Value::Bytes(r.take(*len)?.to_vec())),
            WireType::List { elem, group } => {
                let count = cast_len(read_var_int(r)?)?
                    .checked_mul(*group)
                    .ok_or_else(|| CodecError::OutOfRange("list count overflow".into()))?;
                let mut items = Vec::with_capacity(count.min(r.remaining()));
                for _ in 0..count {
                    items.push(elem.read(r)?);
                }
                Ok(Value::List(items))
            }
            WireType::Enum(map) => {
                let wire = map.inner.read(r)?;
                match map.name_of(&wire) {
                    Some(name) => Ok(Value::Text(name.to_string())),
                    None => Err(CodecError::UnknownSymbol(format!("{wire:?}"))),
                }
            }
            WireType::Composite(fields) => {
                let mut record = Record::new();
                for (name, ty) in fields {
                    let value = ty.read(r)?;
                    record.insert(name.clone(), value);
                }
                Ok(Value::Record(record))
            }
            WireType::Optional { sentinel, inner } => {
                let value = inner.read(r)?;
                if value == **sentinel {
                    Ok(Value::None)
                } else {
                    Ok(value)
                }
            }
            WireType::IpAddress => read_ip_address(r),
            WireType::FloatingInteger => bitcoin::read_floating_integer(r),
            WireType::Checksummed(inner) => {
                let start = r.position();
                let value = inner.read(r)?;
                let body = r.consumed_since(start);
                let digest = bitcoin::hash256d(body);
                let checksum = r.take(4)?;
                if checksum != &digest[..4] {
                    return Err(CodecError::ChecksumMismatch);
                }
                Ok(value)
            }
            WireType::Transaction => bitcoin::read_transaction(r),
        }
    }

    /// Append the encoding of `value` to the sink.
    pub fn write(&self, w: &mut Vec<u8>, value: &Value) -> Result<(), CodecError> {
        match self {
            WireType::Int { bits, endian } => write_int(w, *bits, *endian, value),
            WireType::VarInt => {
                let n = value
                    .as_int()
                    .ok_or_else(|| mismatch("int", value))?
                    .to_u64()
                    .ok_or_else(|| CodecError::OutOfRange("int too large for varint".into()))?;
                write_var_int(w, n);
                Ok(())
            }
            WireType::VarStr => {
                let bytes = value.as_bytes().ok_or_else(|| mismatch("bytes", value))?;
                write_var_int(w, bytes.len() as u64);
                w.extend_from_slice(bytes);
                Ok(())
            }
            WireType::FixedStr(len) => {
                let bytes = value.as_bytes().ok_or_else(|| mismatch("bytes", value))?;
                if bytes.len() != *len {
                    return Err(CodecError::OutOfRange(format!(
                        "fixed string needs {len} bytes, got {}",
                        bytes.len()
                    )));
                }
                w.extend_from_slice(bytes);
                Ok(())
            }
            WireType::List { elem, group } => {
                let items = value.as_list().ok_or_else(|| mismatch("list", value))?;
                if items.len() % group != 0 {
                    return Err(CodecError::OutOfRange(format!(
                        "list of {} elements is not a multiple of {group}",
                        items.len()
                    )));
                }
                write_var_int(w, (items.len() / group) as u64);
                for item in items {
                    elem.write(w, item)?;
                }
                Ok(())
            }
            WireType::Enum(map) => {
                let name = value.as_text().ok_or_else(|| mismatch("text", value))?;
                let wire = map
                    .wire_of(name)
                    .ok_or_else(|| CodecError::UnknownSymbol(name.to_string()))?;
                map.inner.write(w, wire)
            }
            WireType::Composite(fields) => {
                let record = value.as_record().ok_or_else(|| mismatch("record", value))?;
                for (name, ty) in fields {
                    let field = record
                        .get(name)
                        .ok_or_else(|| CodecError::MissingField(name.clone()))?;
                    ty.write(w, field)?;
                }
                Ok(())
            }
            WireType::Optional { sentinel, inner } => {
                if value.is_none() {
                    inner.write(w, sentinel)
                } else if *value == **sentinel {
                    Err(CodecError::SentinelReserved)
                } else {
                    inner.write(w, value)
                }
            }
            WireType::IpAddress => write_ip_address(w, value),
            WireType::FloatingInteger => bitcoin::write_floating_integer(w, value),
            WireType::Checksummed(inner) => {
                let mut body = Vec::new();
                inner.write(&mut body, value)?;
                let digest = bitcoin::hash256d(&body);
                w.extend_from_slice(&body);
                w.extend_from_slice(&digest[..4]);
                Ok(())
            }
            WireType::Transaction => bitcoin::write_transaction(w, value),
        }
    }

    /// Encode a value into a fresh buffer.
    pub fn pack(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        self.write(&mut out, value)?;
        Ok(out)
    }

    /// Decode a complete buffer, rejecting trailing bytes.
    pub fn unpack(&self, data: &[u8]) -> Result<Value, CodecError> {
        self.unpack_with(data, false)
    }

    /// Decode a buffer, optionally tolerating trailing bytes.
    pub fn unpack_with(&self, data: &[u8], ignore_trailing: bool) -> Result<Value, CodecError> {
        let mut r = WireReader::new(data);
        let value = self.read(&mut r)?;
        if !ignore_trailing && r.remaining() > 0 {
            return Err(CodecError::TrailingBytes(r.remaining()));
        }

        if debug_checks_enabled() {
            let repacked = self.pack(&value)?;
            let good = if ignore_trailing {
                data.starts_with(&repacked)
            } else {
                data == repacked.as_slice()
            };
            if !good {
                return Err(CodecError::NonCanonical(
                    "repack of decoded value does not match input".into(),
                ));
            }
        }

        Ok(value)
    }

    /// Number of bytes `value` occupies on the wire.
    ///
    /// Fixed-width descriptors answer without encoding; records remember
    /// the last answer paired with the descriptor that produced it.
    pub fn packed_size(&self, value: &Value) -> Result<usize, CodecError> {
        match self {
            WireType::Int { bits, .. } => return Ok((bits / 8) as usize),
            WireType::FixedStr(len) => return Ok(*len),
            WireType::FloatingInteger => return Ok(4),
            _ => {}
        }

        if let Value::Record(record) = value {
            if let Some(size) = record.cached_packed_size(self) {
                return Ok(size);
            }
            let size = self.pack(value)?.len();
            record.cache_packed_size(self, size);
            return Ok(size);
        }

        Ok(self.pack(value)?.len())
    }
}

fn mismatch(expected: &'static str, got: &Value) -> CodecError {
    CodecError::TypeMismatch {
        expected,
        got: got.kind(),
    }
}

fn cast_len(n: u64) -> Result<usize, CodecError> {
    usize::try_from(n).map_err(|_| CodecError::OutOfRange(format!("length {n} too large")))
}

fn read_int(r: &mut WireReader<'_>, bits: u32, endian: Endian) -> Result<Value, CodecError> {
    let bytes = r.take((bits / 8) as usize)?;
    let n = match endian {
        Endian::Little => BigUint::from_bytes_le(bytes),
        Endian::Big => BigUint::from_bytes_be(bytes),
    };
    Ok(Value::Int(n))
}

fn write_int(w: &mut Vec<u8>, bits: u32, endian: Endian, value: &Value) -> Result<(), CodecError> {
    let n = value.as_int().ok_or_else(|| mismatch("int", value))?;
    if n.bits() > u64::from(bits) {
        return Err(CodecError::OutOfRange(format!(
            "integer does not fit in {bits} bits"
        )));
    }
    let width = (bits / 8) as usize;
    match endian {
        Endian::Little => {
            let mut bytes = n.to_bytes_le();
            bytes.resize(width, 0);
            w.extend_from_slice(&bytes);
        }
        Endian::Big => {
            let bytes = n.to_bytes_be();
            w.extend(std::iter::repeat(0u8).take(width - bytes.len()));
            w.extend_from_slice(&bytes);
        }
    }
    Ok(())
}

/// Compact-size decode. Values below the minimum for their prefix byte are
/// rejected as non-canonical.
pub(crate) fn read_var_int(r: &mut WireReader<'_>) -> Result<u64, CodecError> {
    let first = r.take_u8()?;
    let (value, minimum) = match first {
        0x00..=0xfc => return Ok(u64::from(first)),
        0xfd => {
            let b = r.take(2)?;
            (u64::from(u16::from_le_bytes([b[0], b[1]])), 0xfd)
        }
        0xfe => {
            let b = r.take(4)?;
            (
                u64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                0x1_0000,
            )
        }
        0xff => {
            let b = r.take(8)?;
            (
                u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
                0x1_0000_0000,
            )
        }
    };
    if value < minimum {
        return Err(CodecError::NonCanonical(format!(
            "varint {value:#x} below minimum for its prefix"
        )));
    }
    Ok(value)
}

pub(crate) fn write_var_int(w: &mut Vec<u8>, value: u64) {
    if value < 0xfd {
        w.push(value as u8);
    } else if value <= 0xffff {
        w.push(0xfd);
        w.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        w.push(0xfe);
        w.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        w.push(0xff);
        w.extend_from_slice(&value.to_le_bytes());
    }
}

const IPV4_MAPPED_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];

fn read_ip_address(r: &mut WireReader<'_>) -> Result<Value, CodecError> {
    let data = r.take(16)?;
    if data[..12] == IPV4_MAPPED_PREFIX {
        let quad: Vec<String> = data[12..].iter().map(|b| b.to_string()).collect();
        Ok(Value::Text(quad.join(".")))
    } else {
        let groups: Vec<String> = data
            .chunks(2)
            .map(|pair| hex::encode([pair[0], pair[1]]))
            .collect();
        Ok(Value::Text(groups.join(":")))
    }
}

fn write_ip_address(w: &mut Vec<u8>, value: &Value) -> Result<(), CodecError> {
    let text = value.as_text().ok_or_else(|| mismatch("text", value))?;
    if text.contains(':') {
        // Strict canonical form: exactly eight four-digit groups, the shape
        // decode emits. Compressed (`::`) and irregular groupings are
        // rejected.
        let groups: Vec<&str> = text.split(':').collect();
        if groups.len() != 8 || groups.iter().any(|g| g.len() != 4) {
            return Err(CodecError::OutOfRange(format!(
                "malformed address {text:?}"
            )));
        }
        let bytes = hex::decode(groups.concat())
            .map_err(|_| CodecError::OutOfRange(format!("malformed address {text:?}")))?;
        w.extend_from_slice(&bytes);
    } else {
        let mut octets = Vec::with_capacity(4);
        for part in text.split('.') {
            let octet: u8 = part
                .parse()
                .map_err(|_| CodecError::OutOfRange(format!("malformed address {text:?}")))?;
            octets.push(octet);
        }
        if octets.len() != 4 {
            return Err(CodecError::OutOfRange(format!(
                "malformed address {text:?}"
            )));
        }
        w.extend_from_slice(&IPV4_MAPPED_PREFIX);
        w.extend_from_slice(&octets);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_rejects_non_canonical_forms() {
        // 0xfd prefix carrying a value that fits in one byte
        let mut r = WireReader::new(&[0xfd, 0x00, 0x00]);
        assert!(matches!(
            read_var_int(&mut r),
            Err(CodecError::NonCanonical(_))
        ));

        let mut r = WireReader::new(&[0xfe, 0xff, 0xff, 0x00, 0x00]);
        assert!(matches!(
            read_var_int(&mut r),
            Err(CodecError::NonCanonical(_))
        ));
    }

    #[test]
    fn unpack_rejects_trailing_bytes() {
        let ty = WireType::int(8, Endian::Little);
        assert!(matches!(
            ty.unpack(&[1, 2]),
            Err(CodecError::TrailingBytes(1))
        ));
        assert_eq!(ty.unpack_with(&[1, 2], true).unwrap(), Value::from(1u8));
    }

    #[test]
    fn underflow_is_unexpected_end() {
        let ty = WireType::int(32, Endian::Little);
        assert!(matches!(
            ty.unpack(&[1, 2]),
            Err(CodecError::UnexpectedEnd { needed: 2 })
        ));
    }

    #[test]
    fn wide_int_round_trips_big_endian() {
        let ty = WireType::int(192, Endian::Big);
        let v = Value::Int(BigUint::from(1u8) << 191);
        let packed = ty.pack(&v).unwrap();
        assert_eq!(packed.len(), 24);
        assert_eq!(packed[0], 0x80);
        assert_eq!(ty.unpack(&packed).unwrap(), v);
    }

    #[test]
    fn zero_packs_to_full_width() {
        for endian in [Endian::Little, Endian::Big] {
            let ty = WireType::int(128, endian);
            let packed = ty.pack(&Value::from(0u8)).unwrap();
            assert_eq!(packed, vec![0u8; 16]);
            assert_eq!(ty.unpack(&packed).unwrap(), Value::from(0u8));
        }
    }

    #[test]
    fn composite_reads_declared_fields_in_order() {
        let ty = WireType::composite([
            ("one", WireType::int(8, Endian::Little)),
            ("two", WireType::VarStr),
        ]);
        let packed = ty
            .pack(&Value::Record(crate::record! { "one" => 1u8, "two" => b"2" }))
            .unwrap();
        assert_eq!(packed, vec![0x01, 0x01, b'2']);

        let decoded = ty.unpack(&packed).unwrap();
        let record = decoded.as_record().unwrap();
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["one", "two"]);
    }

    #[test]
    fn composite_rejects_missing_field() {
        let ty = WireType::composite([("one", WireType::int(8, Endian::Little))]);
        let err = ty
            .pack(&Value::Record(crate::record! { "other" => 1u8 }))
            .unwrap_err();
        assert_eq!(err, CodecError::MissingField("one".into()));
    }

    #[test]
    fn debug_checks_accept_canonical_input() {
        set_debug_checks(true);
        let ty = WireType::list(WireType::VarStr);
        let value = Value::List(vec![Value::from(b"abc"), Value::from(b"")]);
        let packed = ty.pack(&value).unwrap();
        assert_eq!(ty.unpack(&packed).unwrap(), value);
        set_debug_checks(false);
    }

    #[test]
    fn ip_address_rejects_non_canonical_text_forms() {
        for addr in [
            "dead::beef",
            // nine segments
            "dead:beef:0123:4567:89ab:cdef:fedc:0001:",
            // sixteen bytes of digits, wrong group boundaries
            "de:adbeef0123:4567:89ab:cdef:fedc:0001",
            "dead:beef:0123:4567:89ab:cdef:fedc",
            "dead:beef:0123:4567:89ab:cdef:fedc:001",
        ] {
            let err = WireType::IpAddress.pack(&Value::from(addr)).unwrap_err();
            assert!(matches!(err, CodecError::OutOfRange(_)), "{addr} accepted");
        }
    }
}
