//! Message framing codec
//!
//! Maps a raw byte stream to discrete protocol frames and back. Each frame
//! is `magic || command || length || checksum || payload`; the decoder
//! hunts for the magic across arbitrary chunk boundaries, so it recovers
//! from garbage between frames and from partial delivery.
//!
//! Checksum *verification* is deliberately left to the dispatch layer: a
//! bad checksum drops one frame, it does not poison the stream.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use crate::codec::bitcoin::hash256d;

/// Network magic values.
pub const MAGIC_MAINNET: [u8; 4] = [0xf9, 0xbe, 0xb4, 0xd9];
pub const MAGIC_TESTNET: [u8; 4] = [0x0b, 0x11, 0x09, 0x07];
pub const MAGIC_REGTEST: [u8; 4] = [0xfa, 0xbf, 0xb5, 0xda];

/// Command slot width in the frame header.
pub const COMMAND_LEN: usize = 12;

/// Header bytes following the magic: command, length, checksum.
pub const HEADER_LEN: usize = COMMAND_LEN + 4 + 4;

/// Default cap on payload length (32MB).
pub const MAX_PAYLOAD_LENGTH: usize = 32 * 1024 * 1024;

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub checksum: [u8; 4],
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build an outgoing frame; the checksum is derived from the payload.
    pub fn new(command: impl Into<String>, payload: Vec<u8>) -> Self {
        let digest = hash256d(&payload);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&digest[..4]);
        Self {
            command: command.into(),
            checksum,
            payload,
        }
    }

    /// Whether the carried checksum matches the payload.
    pub fn checksum_ok(&self) -> bool {
        let digest = hash256d(&self.payload);
        self.checksum == digest[..4]
    }
}

/// Framing errors. Decoding never fails the stream; these arise when
/// encoding or from the underlying transport.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command {0:?} does not fit the {COMMAND_LEN}-byte slot")]
    CommandTooLong(String),

    #[error("command {0:?} contains non-ascii bytes")]
    CommandNotAscii(String),

    #[error("payload of {got} bytes exceeds the {limit}-byte limit")]
    PayloadTooLong { got: usize, limit: usize },
}

enum DecodeState {
    /// Scanning for the magic.
    Hunt,
    /// Magic seen; buffering command, length and checksum.
    Header,
    /// Header seen; buffering the payload.
    Body {
        command: String,
        length: usize,
        checksum: [u8; 4],
    },
}

impl fmt::Debug for DecodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeState::Hunt => write!(f, "DecodeState::Hunt"),
            DecodeState::Header => write!(f, "DecodeState::Header"),
            DecodeState::Body {
                command, length, ..
            } => f
                .debug_struct("DecodeState::Body")
                .field("command", command)
                .field("length", length)
                .finish(),
        }
    }
}

/// Stream framer for one network.
pub struct FrameCodec {
    magic: [u8; 4],
    max_payload_length: usize,
    state: DecodeState,
}

impl FrameCodec {
    pub fn new(magic: [u8; 4], max_payload_length: usize) -> Self {
        Self {
            magic,
            max_payload_length,
            state: DecodeState::Hunt,
        }
    }

    pub fn magic(&self) -> [u8; 4] {
        self.magic
    }

    pub fn max_payload_length(&self) -> usize {
        self.max_payload_length
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match &self.state {
            DecodeState::Hunt => {
                let magic_len = self.magic.len();
                if src.len() < magic_len {
                    return Ok(None);
                }
                match src
                    .windows(magic_len)
                    .position(|window| window == self.magic.as_slice())
                {
                    Some(start) => {
                        src.advance(start + magic_len);
                        self.state = DecodeState::Header;
                        self.decode(src)
                    }
                    None => {
                        // Keep only the bytes a straddling magic could begin in.
                        src.advance(src.len() - (magic_len - 1));
                        Ok(None)
                    }
                }
            }
            DecodeState::Header => {
                if src.len() < HEADER_LEN {
                    trace!(?self.state, "waiting for a full header");
                    return Ok(None);
                }
                let header = src.split_to(HEADER_LEN);

                let command_bytes = &header[..COMMAND_LEN];
                let end = command_bytes
                    .iter()
                    .rposition(|&b| b != 0)
                    .map_or(0, |i| i + 1);
                let trimmed = &command_bytes[..end];
                let length = u32::from_le_bytes([
                    header[COMMAND_LEN],
                    header[COMMAND_LEN + 1],
                    header[COMMAND_LEN + 2],
                    header[COMMAND_LEN + 3],
                ]) as usize;
                let mut checksum = [0u8; 4];
                checksum.copy_from_slice(&header[COMMAND_LEN + 4..]);

                let Ok(command) = std::str::from_utf8(trimmed) else {
                    warn!("dropping frame with non-utf8 command");
                    self.state = DecodeState::Hunt;
                    return self.decode(src);
                };
                if !command.is_ascii() {
                    warn!(command, "dropping frame with non-ascii command");
                    self.state = DecodeState::Hunt;
                    return self.decode(src);
                }
                if length > self.max_payload_length {
                    // The length field is already consumed; resume hunting
                    // without skipping the announced body.
                    warn!(command, length, "length too large");
                    self.state = DecodeState::Hunt;
                    return self.decode(src);
                }

                src.reserve(length + magic_header_len(&self.magic));
                self.state = DecodeState::Body {
                    command: command.to_string(),
                    length,
                    checksum,
                };
                self.decode(src)
            }
            DecodeState::Body {
                command,
                length,
                checksum,
            } => {
                if src.len() < *length {
                    trace!(?self.state, have = src.len(), "waiting for a full body");
                    return Ok(None);
                }
                let frame = Frame {
                    command: command.clone(),
                    checksum: *checksum,
                    payload: src.split_to(*length).to_vec(),
                };
                self.state = DecodeState::Hunt;
                Ok(Some(frame))
            }
        }
    }
}

fn magic_header_len(magic: &[u8; 4]) -> usize {
    magic.len() + HEADER_LEN
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(
            dst,
            self.magic,
            self.max_payload_length,
            &frame.command,
            &frame.payload,
        )
    }
}

/// Write one full frame for `payload` into `dst`.
pub fn encode_frame(
    dst: &mut BytesMut,
    magic: [u8; 4],
    max_payload_length: usize,
    command: &str,
    payload: &[u8],
) -> Result<(), FrameError> {
    if command.len() >= COMMAND_LEN {
        return Err(FrameError::CommandTooLong(command.to_string()));
    }
    if !command.is_ascii() {
        return Err(FrameError::CommandNotAscii(command.to_string()));
    }
    if payload.len() > max_payload_length {
        return Err(FrameError::PayloadTooLong {
            got: payload.len(),
            limit: max_payload_length,
        });
    }

    let mut command_slot = [0u8; COMMAND_LEN];
    command_slot[..command.len()].copy_from_slice(command.as_bytes());
    let digest = hash256d(payload);

    dst.reserve(magic.len() + HEADER_LEN + payload.len());
    dst.put_slice(&magic);
    dst.put_slice(&command_slot);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(&digest[..4]);
    dst.put_slice(payload);
    Ok(())
}
