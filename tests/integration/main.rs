//! murmur integration test harness.
//!
//! Every test builds its nodes on an in-process `MemoryNetwork`, so no
//! sockets or privileges are needed:
//!
//!   cargo test --test integration
//!
//! Each node runs a responder on every connection: pings are answered,
//! chat requests are echoed upper-cased, chat tells are recorded and
//! discovery snapshots are absorbed into the node's directory.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use murmur_core::crypto::Keypair;
use murmur_core::Message;
use murmur_services::{
    unix_now, ConnectionHooks, Incoming, MemoryNetwork, Node, PeerConnection, PeerDirectory, SessionSettings,
};

mod discovery;
mod exchange;
mod lifecycle;
mod stream;

// ── Harness ───────────────────────────────────────────────────────────────────

pub fn test_settings() -> SessionSettings {
    SessionSettings {
        request_timeout: Duration::from_millis(500),
        read_poll_interval: Duration::from_millis(25),
    }
}

pub struct TestNode {
    pub node: Node,
    pub keypair: Arc<Keypair>,
    pub directory: Arc<PeerDirectory>,
    chats: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl TestNode {
    /// Next chat told to this node, if one arrives within a second.
    pub async fn next_chat(&self) -> Option<String> {
        let mut chats = self.chats.lock().await;
        tokio::time::timeout(Duration::from_secs(1), chats.recv())
            .await
            .ok()
            .flatten()
    }
}

#[derive(Clone, Default)]
pub struct Mesh {
    pub net: MemoryNetwork,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `address`, build a responding node for it and start its inbound pump.
    pub fn spawn(&self, address: &str, seed: u8) -> TestNode {
        let (transport, inbound) = self.net.bind(address);
        let keypair = Arc::new(Keypair::from_seed([seed; 32]));
        let directory = Arc::new(PeerDirectory::new(keypair.clone(), 8, 32));
        let (chat_tx, chat_rx) = mpsc::unbounded_channel();

        let node = Node::builder(keypair.clone(), transport)
            .hook(Arc::new(Responder {
                directory: directory.clone(),
                chats: chat_tx,
            }))
            .settings(test_settings())
            .build();
        node.spawn_inbound(inbound);

        TestNode {
            node,
            keypair,
            directory,
            chats: Mutex::new(chat_rx),
        }
    }
}

struct Responder {
    directory: Arc<PeerDirectory>,
    chats: mpsc::UnboundedSender<String>,
}

impl ConnectionHooks for Responder {
    fn on_connect(&self, connection: &Arc<PeerConnection>) {
        let conn = connection.clone();
        let directory = self.directory.clone();
        let chats = self.chats.clone();
        tokio::spawn(async move {
            while let Some(Incoming { nonce, message }) = conn.recv().await {
                match message {
                    Message::Ping if nonce != 0 => {
                        let _ = conn.reply(nonce, &Message::Pong);
                    }
                    Message::Chat(text) if nonce != 0 => {
                        let _ = conn.reply(nonce, &Message::Chat(text.to_uppercase()));
                    }
                    Message::Chat(text) => {
                        let _ = chats.send(text);
                    }
                    Message::Discovery(snapshot) => {
                        let _ = directory.absorb(&snapshot, unix_now()).await;
                    }
                    _ => {}
                }
            }
        });
    }
}

/// Poll `check` every 10 ms for up to two seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
