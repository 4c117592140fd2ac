//! Datagram transport seam.
//!
//! A connection only ever hands complete, signed datagrams to a `Transport`.
//! The daemon backs it with a UDP socket; tests use `MemoryNetwork`, which
//! routes datagrams between in-process endpoints by address.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

pub trait Transport: Send + Sync {
    /// Address peers use to reach this endpoint.
    fn local_address(&self) -> &str;

    /// Queue one datagram for `address`. Must not block.
    fn send_to(&self, address: &str, datagram: Bytes) -> io::Result<()>;
}

/// A datagram as it arrives at an endpoint.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub from: String,
    pub payload: Bytes,
}

// ── In-memory network ─────────────────────────────────────────────────────────

/// Address-keyed switchboard connecting `MemoryTransport` endpoints.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<DashMap<String, mpsc::UnboundedSender<Datagram>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an endpoint. Datagrams sent to `address` arrive on the receiver.
    pub fn bind(&self, address: &str) -> (Arc<MemoryTransport>, mpsc::UnboundedReceiver<Datagram>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints.insert(address.to_string(), tx);
        let transport = Arc::new(MemoryTransport {
            address: address.to_string(),
            network: self.clone(),
        });
        (transport, rx)
    }

    /// Detach an endpoint. Later sends to it fail.
    pub fn unbind(&self, address: &str) {
        self.endpoints.remove(address);
    }

    pub fn is_bound(&self, address: &str) -> bool {
        self.endpoints.contains_key(address)
    }
}

pub struct MemoryTransport {
    address: String,
    network: MemoryNetwork,
}

impl Transport for MemoryTransport {
    fn local_address(&self) -> &str {
        &self.address
    }

    fn send_to(&self, address: &str, datagram: Bytes) -> io::Result<()> {
        let endpoint = self.network.endpoints.get(address).ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionRefused, format!("{address} is not bound"))
        })?;
        endpoint
            .send(Datagram {
                from: self.address.clone(),
                payload: datagram,
            })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, format!("{address} hung up")))
    }
}
