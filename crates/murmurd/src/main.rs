//! murmurd: murmur peer daemon.
//!
//! Usage: murmurd [listen-addr] [peer-addr ...]

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use murmur_core::config::MurmurConfig;
use murmur_core::crypto::{peer_id, Keypair};
use murmur_core::Message;
use murmur_services::{Node, PeerDirectory, SessionSettings};

mod consumer;
mod discovery;
mod udp;

use consumer::DaemonHooks;
use udp::UdpTransport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = MurmurConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = MurmurConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MurmurConfig::default()
    });

    let mut args = std::env::args().skip(1);
    let listen = args
        .next()
        .unwrap_or_else(|| format!("{}:{}", config.network.host, config.network.port));
    let bootstrap: Vec<String> = config.network.bootstrap.iter().cloned().chain(args).collect();

    // Keypair
    let keypair = Arc::new(
        Keypair::load_or_generate(&config.identity.keypair_path)
            .context("failed to load keypair")?,
    );
    tracing::info!(
        public_key = hex::encode(keypair.public),
        peer_id = hex::encode(peer_id(&keypair.public)),
        "keypair ready"
    );

    // Node
    let transport = Arc::new(UdpTransport::bind(&listen).await?);
    let directory = Arc::new(PeerDirectory::from_config(keypair.clone(), &config.discovery));
    let node = Node::builder(keypair.clone(), transport.clone())
        .hook(Arc::new(DaemonHooks::new(directory.clone())))
        .settings(SessionSettings::from(&config.session))
        .build();
    tracing::info!(addr = node.address(), "murmurd listening");

    let receiver = tokio::spawn(udp::receive_loop(transport.socket(), node.clone()));
    let broadcaster = tokio::spawn(discovery::broadcast_loop(
        node.clone(),
        directory.clone(),
        config.discovery.broadcast_interval(),
    ));

    for addr in bootstrap {
        let conn = node.connect(&addr);
        tokio::spawn(async move {
            match conn.request(&Message::Ping, conn.request_timeout()).await {
                Ok(Message::Pong) => tracing::info!(peer = %addr, "bootstrap peer reachable"),
                Ok(other) => {
                    tracing::warn!(peer = %addr, opcode = ?other.opcode(), "unexpected ping reply")
                }
                Err(e) => tracing::warn!(peer = %addr, error = %e, "bootstrap ping failed"),
            }
        });
    }

    // Chat: every stdin line goes to every identified peer
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    match node.broadcast(&Message::Chat(text.to_string())) {
                        Ok(sent) => tracing::debug!(sent, "chat sent"),
                        Err(e) => tracing::warn!(error = %e, "chat not sent"),
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("murmurd shutting down");
    broadcaster.abort();
    node.shutdown().await;
    receiver.abort();
    Ok(())
}
