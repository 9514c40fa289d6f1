//! BIP173: Bech32 Address Encoding
//!
//! Implements the Bech32 checksummed base-32 codec and the segregated
//! witness address forms built on it, including the base-N regrouping
//! helper used for the 8-bit/5-bit payload conversion.
//!
//! Specification:
//! - https://github.com/bitcoin/bips/blob/master/bip-0173.mediawiki
//!
//! Malformed input is reported as `None` at every level, so a caller can
//! treat any failure uniformly as "not an address".

/// Bech32 symbol alphabet.
pub const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

const GENERATOR: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];

/// Regroup a base-2^`from_bits` digit string into base-2^`to_bits`.
///
/// With `pad` the final partial group is zero-filled; without it, leftover
/// bits must be padding-sized and zero or the conversion fails.
pub fn convertbits(data: &[u8], from_bits: u32, to_bits: u32, pad: bool) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut ret = Vec::new();
    let maxv: u32 = (1 << to_bits) - 1;
    let max_acc: u32 = (1 << (from_bits + to_bits - 1)) - 1;
    for &value in data {
        if u32::from(value) >> from_bits != 0 {
            return None;
        }
        acc = ((acc << from_bits) | u32::from(value)) & max_acc;
        bits += from_bits;
        while bits >= to_bits {
            bits -= to_bits;
            ret.push(((acc >> bits) & maxv) as u8);
        }
    }
    if pad {
        if bits > 0 {
            ret.push(((acc << (to_bits - bits)) & maxv) as u8);
        }
    } else if bits >= from_bits || ((acc << (to_bits - bits)) & maxv) != 0 {
        return None;
    }
    Some(ret)
}

fn polymod(values: &[u8]) -> u32 {
    let mut chk: u32 = 1;
    for &value in values {
        let top = chk >> 25;
        chk = (chk & 0x1ff_ffff) << 5 ^ u32::from(value);
        for (i, generator) in GENERATOR.iter().enumerate() {
            if (top >> i) & 1 != 0 {
                chk ^= generator;
            }
        }
    }
    chk
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
    let bytes = hrp.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() * 2 + 1);
    out.extend(bytes.iter().map(|b| b >> 5));
    out.push(0);
    out.extend(bytes.iter().map(|b| b & 31));
    out
}

fn verify_checksum(hrp: &str, data: &[u8]) -> bool {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    polymod(&values) == 1
}

fn create_checksum(hrp: &str, data: &[u8]) -> [u8; 6] {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0; 6]);
    let polymod = polymod(&values) ^ 1;
    let mut checksum = [0u8; 6];
    for (i, symbol) in checksum.iter_mut().enumerate() {
        *symbol = ((polymod >> (5 * (5 - i))) & 31) as u8;
    }
    checksum
}

/// Assemble a Bech32 string from an HRP and 5-bit data values.
pub fn bech32_encode(hrp: &str, data: &[u8]) -> String {
    debug_assert!(data.iter().all(|&d| d < 32));
    let checksum = create_checksum(hrp, data);
    let mut out = String::with_capacity(hrp.len() + 1 + data.len() + 6);
    out.push_str(hrp);
    out.push('1');
    for &d in data.iter().chain(checksum.iter()) {
        out.push(CHARSET[d as usize] as char);
    }
    out
}

/// Validate a Bech32 string and split it into HRP and 5-bit data values
/// (checksum symbols stripped).
pub fn bech32_decode(bech: &str) -> Option<(String, Vec<u8>)> {
    if bech.bytes().any(|b| !(33..=126).contains(&b)) {
        return None;
    }
    let has_lower = bech.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = bech.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper {
        return None;
    }
    let bech = bech.to_ascii_lowercase();
    let pos = bech.rfind('1')?;
    if pos < 1 || pos + 7 > bech.len() || bech.len() > 90 {
        return None;
    }
    let hrp = &bech[..pos];
    let mut data = Vec::with_capacity(bech.len() - pos - 1);
    for symbol in bech[pos + 1..].bytes() {
        data.push(CHARSET.iter().position(|&c| c == symbol)? as u8);
    }
    if !verify_checksum(hrp, &data) {
        return None;
    }
    data.truncate(data.len() - 6);
    Some((hrp.to_string(), data))
}

/// Decode a segwit address: returns the witness version and program.
pub fn segwit_decode(hrp: &str, addr: &str) -> Option<(u8, Vec<u8>)> {
    let (hrp_got, data) = bech32_decode(addr)?;
    if hrp_got != hrp || data.is_empty() {
        return None;
    }
    let program = convertbits(&data[1..], 5, 8, false)?;
    if program.len() < 2 || program.len() > 40 {
        return None;
    }
    let witver = data[0];
    if witver > 16 {
        return None;
    }
    if witver == 0 && program.len() != 20 && program.len() != 32 {
        return None;
    }
    Some((witver, program))
}

/// Encode a segwit address; validated by re-decoding.
pub fn segwit_encode(hrp: &str, witver: u8, witprog: &[u8]) -> Option<String> {
    let mut data = vec![witver];
    data.extend(convertbits(witprog, 8, 5, true)?);
    let addr = bech32_encode(hrp, &data);
    segwit_decode(hrp, &addr)?;
    Some(addr)
}
