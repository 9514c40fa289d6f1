//! Two protocol endpoints exchanging ping/pong over loopback TCP.
//!
//! Run with: cargo run --example ping-pong

use poolwire::network::{core_messages, run_connection, Link, MessageHandler, Protocol};
use poolwire::utils::init_logging;
use poolwire::{record, EngineConfig, Record, TrafficDirection};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

/// Answers every ping with a pong carrying the same nonce.
struct Responder;

impl MessageHandler for Responder {
    fn handle_message(&mut self, link: &Link, command: &str, body: Record) -> anyhow::Result<()> {
        if command == "ping" {
            let nonce = body["nonce"].as_u64().unwrap_or(0);
            info!(nonce, "responder: ping");
            link.send("pong", &record! { "nonce" => nonce })?;
        }
        Ok(())
    }
}

/// Sends pings and hangs up after enough pongs come back.
struct Initiator {
    remaining: u64,
}

impl MessageHandler for Initiator {
    fn handle_message(&mut self, link: &Link, command: &str, body: Record) -> anyhow::Result<()> {
        if command == "pong" {
            let nonce = body["nonce"].as_u64().unwrap_or(0);
            info!(nonce, "initiator: pong");
            self.remaining -= 1;
            if self.remaining == 0 {
                link.disconnect();
            } else {
                link.send("ping", &record! { "nonce" => nonce + 1 })?;
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(Some("info"));
    let config = EngineConfig::default();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    info!(%addr, "listening");

    let responder_config = config.clone();
    let responder = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "accepted");
        let (protocol, outgoing) =
            Protocol::from_config(&responder_config, core_messages(), Responder);
        run_connection(stream, protocol, outgoing).await?;
        anyhow::Ok(())
    });

    let stream = TcpStream::connect(addr).await?;
    let (protocol, outgoing) =
        Protocol::from_config(&config, core_messages(), Initiator { remaining: 3 });
    protocol.link().traffic().subscribe(|direction, bytes| {
        let tag = match direction {
            TrafficDirection::Inbound => "in",
            TrafficDirection::Outbound => "out",
        };
        info!(tag, bytes, "traffic");
    });

    protocol.send("ping", &record! { "nonce" => 1u64 })?;
    run_connection(stream, protocol, outgoing).await?;

    responder.await??;
    info!("done");
    Ok(())
}
