//! TCP transport driver
//!
//! Plumbs one [`Protocol`] to one `TcpStream`: socket reads are fed to
//! [`Protocol::on_bytes`], and the protocol's outgoing queue is drained to
//! the socket in FIFO order. The protocol core itself stays free of I/O.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::network::protocol::{LinkEvent, MessageHandler, Protocol};

/// Read buffer size for socket chunks.
const READ_BUFFER_LEN: usize = 8 * 1024;

/// Drive a connection until the peer hangs up, the handler disconnects, or
/// the socket fails.
pub async fn run_connection<H: MessageHandler>(
    stream: TcpStream,
    mut protocol: Protocol<H>,
    mut outgoing: mpsc::UnboundedReceiver<LinkEvent>,
) -> anyhow::Result<Protocol<H>> {
    let peer = stream.peer_addr()?;
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; READ_BUFFER_LEN];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    debug!(%peer, "peer closed the connection");
                    break;
                }
                protocol.on_bytes(&buf[..n]);
            }
            event = outgoing.recv() => {
                match event {
                    Some(LinkEvent::Data(bytes)) => writer.write_all(&bytes).await?,
                    Some(LinkEvent::Abort) => {
                        debug!(%peer, "aborting connection");
                        let _ = writer.shutdown().await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    Ok(protocol)
}
