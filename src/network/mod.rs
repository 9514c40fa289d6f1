//! Network layer
//!
//! Stream framing and message dispatch for pool peer connections, plus the
//! TCP driver that binds a protocol instance to a socket.

pub mod framing;
pub mod protocol;
pub mod tcp;

pub use framing::{Frame, FrameCodec, FrameError, MAGIC_MAINNET, MAGIC_REGTEST, MAGIC_TESTNET};
pub use protocol::{
    core_messages, Link, LinkEvent, MessageHandler, MessageRegistry, Protocol, ProtocolError,
    TrafficDirection, TrafficEvent,
};
pub use tcp::run_connection;
