//! Node: the local endpoint and its table of peer connections.
//!
//! Inbound path for every datagram:
//!   decode envelope → verify signature → decode payload via the registry
//!   → bind or check the sender's identity → route
//!
//! Routing: replies go to `deliver`, stream chunks to `ingest`, anything
//! else to the connection's inbox for its consumer. Failures at any step
//! drop the datagram; they never take the node down.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use murmur_core::config::SessionConfig;
use murmur_core::crypto::{SignatureScheme, PUBLIC_KEY_LEN};
use murmur_core::wire::Envelope;
use murmur_core::{Message, MessageRegistry};

use crate::connection::{Incoming, PeerConnection};
use crate::error::SessionError;
use crate::hooks::{ConnectionHooks, HookSet};
use crate::transport::{Datagram, Transport};

/// Timing knobs shared by every connection of a node.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub request_timeout: Duration,
    pub read_poll_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            read_poll_interval: config.read_poll_interval(),
        }
    }
}

/// State every connection needs from its node.
pub(crate) struct NodeContext {
    pub(crate) signer: Arc<dyn SignatureScheme>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) hooks: HookSet,
    pub(crate) registry: MessageRegistry,
    pub(crate) settings: SessionSettings,
}

impl NodeContext {
    /// Encode, sign and frame one message.
    pub(crate) fn prepare(&self, message: &Message, nonce: u64, flags: u8) -> Result<Bytes, SessionError> {
        let payload = message.encode_payload().map_err(SessionError::Encode)?;
        let envelope = Envelope::seal(
            self.signer.as_ref(),
            message.opcode().into(),
            nonce,
            flags,
            payload,
        )
        .map_err(SessionError::from_seal)?;
        Ok(Bytes::from(envelope.encode()))
    }
}

/// Connections by transport address and by remote public key.
#[derive(Default)]
pub(crate) struct ConnectionTable {
    by_address: DashMap<String, Arc<PeerConnection>>,
    by_key: DashMap<[u8; PUBLIC_KEY_LEN], Arc<PeerConnection>>,
}

impl ConnectionTable {
    /// Drop both entries for `conn`, leaving any newer connection alone.
    pub(crate) fn remove(&self, conn: &PeerConnection) {
        let same = |held: &Arc<PeerConnection>| std::ptr::eq(Arc::as_ptr(held), conn);
        self.by_address.remove_if(conn.address(), |_, held| same(held));
        if let Some(remote) = conn.remote() {
            self.by_key.remove_if(&remote.public_key, |_, held| same(held));
        }
    }

    /// Index `conn` under its remote key unless it is already closed.
    pub(crate) fn register_identity(&self, key: [u8; PUBLIC_KEY_LEN], conn: &Arc<PeerConnection>) {
        if conn.is_closed() {
            return;
        }
        self.by_key.insert(key, conn.clone());
        // A close that ran before the insert has already swept the table
        if conn.is_closed() {
            self.by_key.remove_if(&key, |_, held| Arc::ptr_eq(held, conn));
        }
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

pub struct NodeBuilder {
    signer: Arc<dyn SignatureScheme>,
    transport: Arc<dyn Transport>,
    hooks: HookSet,
    registry: MessageRegistry,
    settings: SessionSettings,
}

impl NodeBuilder {
    pub fn hook(mut self, hook: Arc<dyn ConnectionHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn registry(mut self, registry: MessageRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Node {
        Node {
            ctx: Arc::new(NodeContext {
                signer: self.signer,
                transport: self.transport,
                hooks: self.hooks,
                registry: self.registry,
                settings: self.settings,
            }),
            table: Arc::new(ConnectionTable::default()),
        }
    }
}

// ── Node ──────────────────────────────────────────────────────────────────────

/// Cheap to clone; clones share the same connection table.
#[derive(Clone)]
pub struct Node {
    ctx: Arc<NodeContext>,
    table: Arc<ConnectionTable>,
}

impl Node {
    pub fn builder(signer: Arc<dyn SignatureScheme>, transport: Arc<dyn Transport>) -> NodeBuilder {
        NodeBuilder {
            signer,
            transport,
            hooks: HookSet::new(),
            registry: MessageRegistry::with_builtin(),
            settings: SessionSettings::default(),
        }
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.ctx.signer.public_key()
    }

    pub fn address(&self) -> &str {
        self.ctx.transport.local_address()
    }

    pub fn signer(&self) -> Arc<dyn SignatureScheme> {
        self.ctx.signer.clone()
    }

    pub fn settings(&self) -> SessionSettings {
        self.ctx.settings
    }

    /// The connection for `address`, created (and announced to hooks) if new.
    pub fn connect(&self, address: &str) -> Arc<PeerConnection> {
        if let Some(existing) = self.table.by_address.get(address) {
            return existing.clone();
        }
        let fresh = Arc::new(PeerConnection::new(
            self.ctx.clone(),
            Arc::downgrade(&self.table),
            address.to_string(),
        ));
        let held = self
            .table
            .by_address
            .entry(address.to_string())
            .or_insert_with(|| fresh.clone())
            .clone();

        // Hooks run after the shard lock is released
        if Arc::ptr_eq(&held, &fresh) {
            tracing::debug!(peer = %address, "new connection");
            self.ctx.hooks.connect(&held);
        }
        held
    }

    pub fn connection(&self, address: &str) -> Option<Arc<PeerConnection>> {
        self.table.by_address.get(address).map(|c| c.clone())
    }

    /// Connection whose remote side signs with `public_key`.
    pub fn peer(&self, public_key: &[u8; PUBLIC_KEY_LEN]) -> Option<Arc<PeerConnection>> {
        self.table.by_key.get(public_key).map(|c| c.clone())
    }

    pub fn connections(&self) -> Vec<Arc<PeerConnection>> {
        self.table.by_address.iter().map(|e| e.value().clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.table.by_address.len()
    }

    /// `tell` every connected peer whose identity is known. Returns how many sends succeeded.
    ///
    /// The message is sealed once and the same datagram goes to every peer,
    /// so an encode or signing failure is returned before anything is sent.
    pub fn broadcast(&self, message: &Message) -> Result<usize, SessionError> {
        let datagram = self.ctx.prepare(message, 0, 0)?;
        let mut sent = 0;
        for conn in self.connections() {
            if conn.remote().is_none() {
                continue;
            }
            match conn.send_datagram(datagram.clone()) {
                Ok(()) => sent += 1,
                Err(e) => tracing::debug!(peer = %conn.address(), error = %e, "broadcast send failed"),
            }
        }
        Ok(sent)
    }

    /// Process one datagram received from `from`.
    pub async fn handle_datagram(&self, from: &str, datagram: &[u8]) -> Result<(), SessionError> {
        let envelope = Envelope::decode(datagram).map_err(SessionError::Decode)?;
        envelope.verify()?;
        let message = self
            .ctx
            .registry
            .decode(envelope.opcode, &envelope.payload)
            .map_err(SessionError::Decode)?;

        let conn = self.connect(from);
        if conn.bind_identity(envelope.sender)? {
            tracing::info!(
                peer = %from,
                public_key = hex::encode(envelope.sender),
                "peer identified"
            );
            self.table.register_identity(envelope.sender, &conn);
        }

        if envelope.is_reply() {
            if !conn.deliver(envelope.nonce, message) {
                tracing::trace!(peer = %from, nonce = envelope.nonce, "unmatched reply dropped");
            }
            return Ok(());
        }

        match message {
            Message::Stream(chunk) => conn.ingest(&chunk).await,
            message => {
                conn.push_inbox(Incoming {
                    nonce: envelope.nonce,
                    message,
                });
                Ok(())
            }
        }
    }

    /// Feed datagrams from a channel into `handle_datagram` until it closes.
    pub fn spawn_inbound(&self, mut inbound: mpsc::UnboundedReceiver<Datagram>) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            while let Some(dgram) = inbound.recv().await {
                if let Err(e) = node.handle_datagram(&dgram.from, &dgram.payload).await {
                    tracing::warn!(peer = %dgram.from, error = %e, "datagram dropped");
                }
            }
        })
    }

    /// Close every connection.
    pub async fn shutdown(&self) {
        for conn in self.connections() {
            conn.close().await;
        }
    }
}
