//! Peer connection: everything the node holds about one remote address.
//!
//! Four ways to talk to a peer:
//!   - `tell`    fire-and-forget, nonce 0
//!   - `request` allocate a nonce, wait for the matching reply or time out
//!   - `reply`   answer an inbound request, echoing its nonce
//!   - `write`   append to the peer's byte stream, read back with `read`
//!
//! Replies carry `FLAG_REPLY`. The node routes flagged envelopes to
//! `deliver` and everything else to the stream buffer or the inbox, so a
//! peer's request nonces never collide with ours.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};

use murmur_core::crypto::{peer_id, PUBLIC_KEY_LEN};
use murmur_core::wire::FLAG_REPLY;
use murmur_core::Message;

use crate::error::SessionError;
use crate::node::{ConnectionTable, NodeContext};

/// A non-stream message waiting for the connection's consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    /// Non-zero when the sender expects a `reply`.
    pub nonce: u64,
    pub message: Message,
}

/// Key the remote side signs with, learned from its first verified envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub peer_id: [u8; 32],
}

#[derive(Default)]
struct StreamState {
    buffer: BytesMut,
    closed: bool,
}

pub struct PeerConnection {
    ctx: Arc<NodeContext>,
    table: Weak<ConnectionTable>,
    address: String,
    remote: OnceLock<RemoteIdentity>,

    requests: DashMap<u64, oneshot::Sender<Message>>,
    request_nonce: AtomicU64,

    stream: Mutex<StreamState>,
    readable: Notify,
    closed: watch::Sender<bool>,

    inbox_tx: mpsc::UnboundedSender<Incoming>,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<Incoming>>,
}

/// Removes a pending request on every exit path of `request`.
struct PendingRequest<'a> {
    requests: &'a DashMap<u64, oneshot::Sender<Message>>,
    nonce: u64,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.requests.remove(&self.nonce);
    }
}

impl PeerConnection {
    pub(crate) fn new(ctx: Arc<NodeContext>, table: Weak<ConnectionTable>, address: String) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Self {
            ctx,
            table,
            address,
            remote: OnceLock::new(),
            requests: DashMap::new(),
            request_nonce: AtomicU64::new(0),
            stream: Mutex::new(StreamState::default()),
            readable: Notify::new(),
            closed,
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// `None` until the peer's first envelope has been verified.
    pub fn remote(&self) -> Option<RemoteIdentity> {
        self.remote.get().copied()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Default budget for `request`, from the node's settings.
    pub fn request_timeout(&self) -> Duration {
        self.ctx.settings.request_timeout
    }

    /// Requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Send without expecting a reply.
    pub fn tell(&self, message: &Message) -> Result<(), SessionError> {
        self.send(message, 0, 0)
    }

    /// Send and wait for the correlated reply.
    ///
    /// The pending entry is registered before the datagram leaves, so a reply
    /// can never beat its own registration. The entry is gone when this
    /// returns, whatever the outcome, including when the future is dropped.
    pub async fn request(&self, message: &Message, timeout: Duration) -> Result<Message, SessionError> {
        let nonce = self.request_nonce.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.requests.insert(nonce, tx);
        let _pending = PendingRequest {
            requests: &self.requests,
            nonce,
        };

        self.send(message, nonce, 0)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(SessionError::ConnectionClosed(self.address.clone())),
            Err(_) => {
                tracing::debug!(peer = %self.address, nonce, ?timeout, "request timed out");
                Err(SessionError::RequestTimeout { nonce, timeout })
            }
        }
    }

    /// Answer an inbound request. `nonce` is the one carried by the request.
    pub fn reply(&self, nonce: u64, message: &Message) -> Result<(), SessionError> {
        self.send(message, nonce, FLAG_REPLY)
    }

    /// Send one chunk of the byte stream. Returns the bytes written.
    pub fn write(&self, data: &[u8]) -> Result<usize, SessionError> {
        self.tell(&Message::Stream(Bytes::copy_from_slice(data)))?;
        Ok(data.len())
    }

    fn send(&self, message: &Message, nonce: u64, flags: u8) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::ConnectionClosed(self.address.clone()));
        }
        let datagram = self.ctx.prepare(message, nonce, flags)?;
        self.send_datagram(datagram)
    }

    /// Put an already sealed datagram on the wire.
    pub(crate) fn send_datagram(&self, datagram: Bytes) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::ConnectionClosed(self.address.clone()));
        }
        if let Err(source) = self.ctx.transport.send_to(&self.address, datagram) {
            let err = SessionError::Transport {
                address: self.address.clone(),
                source,
            };
            self.ctx.hooks.transport_error(self, &err);
            return Err(err);
        }
        Ok(())
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Hand a reply to the request waiting on `nonce`.
    ///
    /// Returns false when nothing is waiting (late, duplicate or unsolicited).
    pub fn deliver(&self, nonce: u64, message: Message) -> bool {
        match self.requests.remove(&nonce) {
            Some((_, tx)) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Append a stream chunk to the unread buffer.
    pub async fn ingest(&self, chunk: &[u8]) -> Result<(), SessionError> {
        let mut stream = self.stream.lock().await;
        if stream.closed {
            return Err(SessionError::ConnectionClosed(self.address.clone()));
        }
        let was_empty = stream.buffer.is_empty();
        stream.buffer.extend_from_slice(chunk);
        drop(stream);
        if was_empty && !chunk.is_empty() {
            self.readable.notify_one();
        }
        Ok(())
    }

    /// Read stream bytes into `into`, waiting until some are available.
    ///
    /// Buffered bytes are drained before closure is reported. A blocked
    /// reader re-checks at least every `read_poll_interval`.
    pub async fn read(&self, into: &mut [u8]) -> Result<usize, SessionError> {
        if into.is_empty() {
            return Ok(0);
        }
        let mut closed = self.closed.subscribe();
        loop {
            {
                let mut stream = self.stream.lock().await;
                let n = into.len().min(stream.buffer.len());
                if n > 0 {
                    into[..n].copy_from_slice(&stream.buffer[..n]);
                    stream.buffer.advance(n);
                    return Ok(n);
                }
                if stream.closed {
                    return Err(SessionError::ConnectionClosed(self.address.clone()));
                }
            }
            tokio::select! {
                _ = self.readable.notified() => {}
                _ = closed.changed() => {}
                _ = tokio::time::sleep(self.ctx.settings.read_poll_interval) => {}
            }
        }
    }

    /// Queue a message for `recv`. Dropped if the connection is closed.
    pub(crate) fn push_inbox(&self, incoming: Incoming) {
        if self.is_closed() {
            return;
        }
        let _ = self.inbox_tx.send(incoming);
    }

    /// Next non-stream message from this peer. `None` once closed and drained.
    pub async fn recv(&self) -> Option<Incoming> {
        let mut inbox = self.inbox_rx.lock().await;
        if let Ok(incoming) = inbox.try_recv() {
            return Some(incoming);
        }
        let mut closed = self.closed.subscribe();
        tokio::select! {
            incoming = inbox.recv() => incoming,
            _ = closed.wait_for(|c| *c) => None,
        }
    }

    /// Record the remote key. Returns true the first time.
    pub(crate) fn bind_identity(&self, public_key: [u8; PUBLIC_KEY_LEN]) -> Result<bool, SessionError> {
        let mut first = false;
        let bound = self.remote.get_or_init(|| {
            first = true;
            RemoteIdentity {
                public_key,
                peer_id: peer_id(&public_key),
            }
        });
        if bound.public_key != public_key {
            return Err(SessionError::IdentityMismatch {
                address: self.address.clone(),
                bound: hex::encode(bound.public_key),
                presented: hex::encode(public_key),
            });
        }
        Ok(first)
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Close the connection. Idempotent.
    ///
    /// Outstanding requests are left to their own timeouts.
    pub async fn close(&self) {
        {
            let mut stream = self.stream.lock().await;
            if stream.closed {
                return;
            }
            stream.closed = true;
        }
        self.closed.send_replace(true);
        self.readable.notify_waiters();

        tracing::debug!(peer = %self.address, "connection closed");
        self.ctx.hooks.disconnect(self);
        if let Some(table) = self.table.upgrade() {
            table.remove(self);
        }
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("address", &self.address)
            .field("remote", &self.remote.get().map(|r| hex::encode(r.public_key)))
            .field("closed", &self.is_closed())
            .finish()
    }
}
