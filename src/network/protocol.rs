//! Message-oriented stream protocol
//!
//! A [`Protocol`] binds the framing codec to one connection: bytes go in
//! through [`Protocol::on_bytes`], validated `(command, record)` messages
//! come out through a [`MessageHandler`], and outgoing messages are encoded
//! by [`Link::send`] and queued FIFO for the transport driver.
//!
//! The protocol is a single-threaded cooperative actor: `on_bytes` is never
//! re-entered for one connection, there are no internal suspension points,
//! and a partial chunk simply leaves the decoder suspended until more bytes
//! arrive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use bytes::BytesMut;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tracing::{debug, error, warn};

use crate::codec::bitcoin::address_type;
use crate::codec::{CodecError, Endian, Record, Value, WireType};
use crate::config::EngineConfig;
use crate::network::framing::{encode_frame, Frame, FrameCodec, COMMAND_LEN};

/// Protocol-layer errors raised when sending.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("command {0:?} too long")]
    CommandTooLong(String),

    #[error("payload of {got} bytes exceeds the {limit}-byte limit")]
    PayloadTooLong { got: usize, limit: usize },

    #[error("descriptor for {0:?} does not decode to a record")]
    NotARecordType(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("connection is gone")]
    LinkClosed,
}

/// Direction tag for traffic events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficDirection {
    Inbound,
    Outbound,
}

type TrafficListener = Box<dyn Fn(TrafficDirection, usize) + Send + Sync>;

/// Synchronous traffic signal. Listeners are invoked inline from the
/// deframer and the sender, so they must be cheap and must not block.
#[derive(Clone, Default)]
pub struct TrafficEvent {
    listeners: Arc<RwLock<Vec<TrafficListener>>>,
}

impl TrafficEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(TrafficDirection, usize) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(Box::new(listener));
        }
    }

    pub(crate) fn happened(&self, direction: TrafficDirection, bytes: usize) {
        if let Ok(listeners) = self.listeners.read() {
            for listener in listeners.iter() {
                listener(direction, bytes);
            }
        }
    }
}

/// Command-to-descriptor table. Every registered descriptor must decode to
/// a record, so handlers always receive named fields.
#[derive(Debug, Clone, Default)]
pub struct MessageRegistry {
    messages: HashMap<String, WireType>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        command: impl Into<String>,
        ty: WireType,
    ) -> Result<(), ProtocolError> {
        let command = command.into();
        if command.len() >= COMMAND_LEN {
            return Err(ProtocolError::CommandTooLong(command));
        }
        if !matches!(
            ty,
            WireType::Composite(_) | WireType::Transaction | WireType::Checksummed(_)
        ) {
            return Err(ProtocolError::NotARecordType(command));
        }
        self.messages.insert(command, ty);
        Ok(())
    }

    pub fn get(&self, command: &str) -> Option<&WireType> {
        self.messages.get(command)
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }
}

/// The base message set spoken on every connection.
pub fn core_messages() -> MessageRegistry {
    let mut registry = MessageRegistry::new();
    let int32 = || WireType::int(32, Endian::Little);
    let int64 = || WireType::int(64, Endian::Little);

    let inventory_item = WireType::composite([
        (
            "type",
            WireType::enumeration(
                int32(),
                [(Value::from(1u32), "tx"), (Value::from(2u32), "block")],
            )
            .expect("static enum table"),
        ),
        ("hash", WireType::int(256, Endian::Little)),
    ]);

    let entries: Vec<(&str, WireType)> = vec![
        (
            "version",
            WireType::composite([
                ("version", int32()),
                ("services", int64()),
                ("timestamp", int64()),
                ("addr_recv", address_type().clone()),
                ("addr_from", address_type().clone()),
                ("nonce", int64()),
                ("user_agent", WireType::VarStr),
                ("start_height", int32()),
            ]),
        ),
        ("verack", WireType::Composite(Vec::new())),
        ("ping", WireType::composite([("nonce", int64())])),
        ("pong", WireType::composite([("nonce", int64())])),
        (
            "addr",
            WireType::composite([(
                "addrs",
                WireType::list(WireType::composite([
                    ("timestamp", int32()),
                    ("address", address_type().clone()),
                ])),
            )]),
        ),
        ("getaddr", WireType::Composite(Vec::new())),
        (
            "inv",
            WireType::composite([("invs", WireType::list(inventory_item.clone()))]),
        ),
        (
            "getdata",
            WireType::composite([("requests", WireType::list(inventory_item))]),
        ),
        ("tx", WireType::composite([("tx", WireType::Transaction)])),
    ];
    for (command, ty) in entries {
        registry
            .register(command, ty)
            .expect("static message table");
    }
    registry
}

/// Events queued for the transport driver, in send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Write these bytes to the peer.
    Data(Vec<u8>),
    /// Abort the transport.
    Abort,
}

/// Outgoing half of a connection. Cheap to clone; handlers use it to reply
/// and to disconnect.
#[derive(Clone)]
pub struct Link {
    magic: [u8; 4],
    max_payload_length: usize,
    messages: Arc<MessageRegistry>,
    outgoing: mpsc::UnboundedSender<LinkEvent>,
    traffic: TrafficEvent,
    disconnecting: Arc<AtomicBool>,
}

impl Link {
    /// Encode `body` under `command`'s descriptor and queue the frame.
    pub fn send(&self, command: &str, body: &Record) -> Result<(), ProtocolError> {
        if command.len() >= COMMAND_LEN {
            return Err(ProtocolError::CommandTooLong(command.to_string()));
        }
        let ty = self
            .messages
            .get(command)
            .ok_or_else(|| ProtocolError::UnknownCommand(command.to_string()))?;
        let payload = ty.pack(&Value::Record(body.clone()))?;
        if payload.len() > self.max_payload_length {
            return Err(ProtocolError::PayloadTooLong {
                got: payload.len(),
                limit: self.max_payload_length,
            });
        }

        let mut buf = BytesMut::new();
        encode_frame(
            &mut buf,
            self.magic,
            self.max_payload_length,
            command,
            &payload,
        )
        .map_err(|_| ProtocolError::CommandTooLong(command.to_string()))?;

        self.traffic.happened(TrafficDirection::Outbound, buf.len());
        self.outgoing
            .send(LinkEvent::Data(buf.to_vec()))
            .map_err(|_| ProtocolError::LinkClosed)
    }

    /// Mark the connection as going away and ask the transport to abort.
    pub fn disconnect(&self) {
        self.disconnecting.store(true, Ordering::Relaxed);
        let _ = self.outgoing.send(LinkEvent::Abort);
    }

    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting.load(Ordering::Relaxed)
    }

    pub fn traffic(&self) -> &TrafficEvent {
        &self.traffic
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.messages
    }
}

/// Per-connection message callbacks.
pub trait MessageHandler: Send {
    /// Called once per validated, decoded message. Returning an error logs
    /// the offending frame and disconnects the peer.
    fn handle_message(&mut self, link: &Link, command: &str, body: Record) -> anyhow::Result<()>;

    /// Called when a frame arrives with a bad checksum. The frame is
    /// dropped either way.
    fn bad_peer(&mut self, _link: &Link) {}
}

/// One connection's protocol engine.
pub struct Protocol<H: MessageHandler> {
    codec: FrameCodec,
    buffer: BytesMut,
    link: Link,
    handler: H,
    ignore_trailing_payload: bool,
}

impl<H: MessageHandler> Protocol<H> {
    /// Build a protocol instance and the receiving end of its outgoing
    /// queue, which a transport driver drains in FIFO order.
    pub fn new(
        magic: [u8; 4],
        max_payload_length: usize,
        messages: MessageRegistry,
        handler: H,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (outgoing, rx) = mpsc::unbounded_channel();
        let protocol = Self {
            codec: FrameCodec::new(magic, max_payload_length),
            buffer: BytesMut::new(),
            link: Link {
                magic,
                max_payload_length,
                messages: Arc::new(messages),
                outgoing,
                traffic: TrafficEvent::new(),
                disconnecting: Arc::new(AtomicBool::new(false)),
            },
            handler,
            ignore_trailing_payload: false,
        };
        (protocol, rx)
    }

    pub fn from_config(
        config: &EngineConfig,
        messages: MessageRegistry,
        handler: H,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (mut protocol, rx) =
            Self::new(config.magic(), config.max_payload_length, messages, handler);
        protocol.ignore_trailing_payload = config.ignore_trailing_payload;
        (protocol, rx)
    }

    /// Tolerate trailing bytes after a decoded message body.
    pub fn set_ignore_trailing_payload(&mut self, ignore: bool) {
        self.ignore_trailing_payload = ignore;
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn send(&self, command: &str, body: &Record) -> Result<(), ProtocolError> {
        self.link.send(command, body)
    }

    pub fn disconnect(&self) {
        self.link.disconnect();
    }

    /// Feed an arbitrary chunk of the byte stream. Every complete frame in
    /// the buffer is dispatched before returning; a partial frame stays
    /// buffered.
    pub fn on_bytes(&mut self, chunk: &[u8]) {
        self.link
            .traffic
            .happened(TrafficDirection::Inbound, chunk.len());
        self.buffer.extend_from_slice(chunk);
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(frame)) => self.dispatch(frame),
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "deframing error");
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        if !frame.checksum_ok() {
            warn!(
                command = %frame.command,
                length = frame.payload.len(),
                checksum = %hex::encode(frame.checksum),
                "invalid checksum for message"
            );
            debug!(payload = %hex::encode(&frame.payload), "checksum failure payload");
            self.handler.bad_peer(&self.link);
            return;
        }

        let Some(ty) = self.link.messages.get(&frame.command) else {
            debug!(command = %frame.command, "no type for command");
            return;
        };

        let body = match ty.unpack_with(&frame.payload, self.ignore_trailing_payload) {
            Ok(Value::Record(record)) => record,
            Ok(other) => {
                error!(
                    command = %frame.command,
                    kind = other.kind(),
                    "message descriptor produced a non-record body"
                );
                self.link.disconnect();
                return;
            }
            Err(err) => {
                log_frame_preview(&frame);
                error!(%err, command = %frame.command, "error decoding message");
                self.link.disconnect();
                return;
            }
        };

        if self.link.is_disconnecting() {
            return;
        }

        if let Err(err) = self
            .handler
            .handle_message(&self.link, &frame.command, body)
        {
            log_frame_preview(&frame);
            error!(%err, command = %frame.command, "error handling message");
            self.link.disconnect();
        }
    }
}

fn log_frame_preview(frame: &Frame) {
    error!(
        "RECV {} {}{}",
        frame.command,
        hex::encode(&frame.payload[..frame.payload.len().min(100)]),
        if frame.payload.len() > 100 { "..." } else { "" }
    );
}
