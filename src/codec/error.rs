//! Codec error types
//!
//! Decode errors are raised while consuming bytes; encode errors are raised
//! before any byte is emitted.

use thiserror::Error;

/// Errors produced by the descriptor algebra.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input exhausted in the middle of a read.
    #[error("unexpected end of input: needed {needed} more byte(s)")]
    UnexpectedEnd { needed: usize },

    /// A top-level decode left unconsumed bytes behind.
    #[error("{0} trailing byte(s) after top-level decode")]
    TrailingBytes(usize),

    /// Non-canonical encoding: a VarInt below the minimum for its prefix,
    /// or a repack self-check mismatch.
    #[error("non-canonical encoding: {0}")]
    NonCanonical(String),

    /// Value outside the encodable domain (integer range, string length,
    /// list grouping, malformed address).
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// Enum wire value (decode) or name (encode) not present in the map.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Attempt to encode a present value equal to an Optional's sentinel.
    #[error("value equals the sentinel reserved for absence")]
    SentinelReserved,

    /// Trailing checksum of a checksummed envelope did not match.
    #[error("checksum mismatch in checksummed envelope")]
    ChecksumMismatch,

    /// A value of the wrong shape was handed to a descriptor.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    /// A record handed to a composite descriptor lacked a declared field.
    #[error("missing field {0:?}")]
    MissingField(String),

    /// Two logical names mapped to the same wire value (or vice versa)
    /// when building an enum descriptor.
    #[error("duplicate entry in enum mapping")]
    DuplicateEnumValue,
}
