//! Per-connection consumers, started from the connect hook.

use std::sync::Arc;

use murmur_core::Message;
use murmur_services::{unix_now, ConnectionHooks, Incoming, PeerConnection, PeerDirectory, SessionError};

pub struct DaemonHooks {
    directory: Arc<PeerDirectory>,
}

impl DaemonHooks {
    pub fn new(directory: Arc<PeerDirectory>) -> Self {
        Self { directory }
    }
}

impl ConnectionHooks for DaemonHooks {
    fn on_connect(&self, connection: &Arc<PeerConnection>) {
        tracing::info!(peer = %connection.address(), "peer connected");
        tokio::spawn(consume(connection.clone(), self.directory.clone()));
        tokio::spawn(drain_stream(connection.clone()));
    }

    fn on_disconnect(&self, connection: &PeerConnection) {
        tracing::info!(peer = %connection.address(), "peer disconnected");
    }

    fn on_transport_error(&self, connection: &PeerConnection, error: &SessionError) {
        tracing::warn!(peer = %connection.address(), error = %error, "send failed");
    }
}

async fn consume(conn: Arc<PeerConnection>, directory: Arc<PeerDirectory>) {
    while let Some(Incoming { nonce, message }) = conn.recv().await {
        match message {
            Message::Chat(text) => {
                tracing::info!(peer = %conn.address(), text = %text, "chat");
            }
            Message::Ping => {
                if nonce == 0 {
                    continue;
                }
                if let Err(e) = conn.reply(nonce, &Message::Pong) {
                    tracing::debug!(peer = %conn.address(), error = %e, "pong failed");
                }
            }
            Message::Discovery(snapshot) => match directory.absorb(&snapshot, unix_now()).await {
                Ok(recorded) => {
                    tracing::debug!(peer = %conn.address(), recorded, "discovery snapshot absorbed")
                }
                Err(e) => {
                    tracing::warn!(peer = %conn.address(), error = %e, "discovery snapshot rejected")
                }
            },
            Message::Pong => {
                tracing::trace!(peer = %conn.address(), "unsolicited pong");
            }
            Message::Stream(_) => {}
        }
    }
}

async fn drain_stream(conn: Arc<PeerConnection>) {
    let mut buf = [0u8; 4096];
    while let Ok(n) = conn.read(&mut buf).await {
        tracing::debug!(peer = %conn.address(), bytes = n, "stream data");
    }
}
