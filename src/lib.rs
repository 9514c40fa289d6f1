//! poolwire - wire serialization and message framing for P2Pool-style nodes
//!
//! This crate provides the two subsystems every pool peer connection is
//! built on:
//!
//! 1. A **type-driven codec**: declarative [`codec::WireType`] descriptors
//!    for the Bitcoin-family wire formats (integers of any byte width,
//!    compact-size integers, byte strings, enums, lists, composites,
//!    optionals with a sentinel, addresses, checksummed envelopes, compact
//!    difficulty targets, and BIP-141 transactions). Every descriptor is
//!    both parser and serializer, and round-trips are bit-exact.
//! 2. A **message-framing protocol engine**: [`network::Protocol`] consumes
//!    an arbitrarily fragmented byte stream, validates each frame with a
//!    double-SHA256 checksum, and dispatches decoded bodies by command name
//!    to a [`network::MessageHandler`].
//!
//! Bech32 segwit address encoding ([`bech32`]) and `VERSION` file
//! bookkeeping ([`version`]) round out the self-contained pieces the rest
//! of a pool node builds on.
//!
//! ## Design Principles
//!
//! 1. **Bit-exact wire compatibility**: encodings match the Bitcoin/P2Pool
//!    reference formats, canonical forms enforced on decode
//! 2. **Pure codec core**: no I/O and no shared mutable state below the
//!    transport driver
//! 3. **Non-fatal framing errors**: a bad frame drops or disconnects one
//!    peer, never the process

pub mod bech32;
pub mod codec;
pub mod config;
pub mod network;
pub mod utils;
pub mod version;

pub use codec::{
    hash256d, set_debug_checks, CodecError, Endian, FloatingInteger, Record, Value, WireType,
};
pub use config::{EngineConfig, NetworkKind};
pub use network::{
    core_messages, Frame, FrameCodec, Link, LinkEvent, MessageHandler, MessageRegistry, Protocol,
    ProtocolError, TrafficDirection, TrafficEvent,
};
pub use version::sync_version_file;
