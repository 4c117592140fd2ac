//! UDP transport: one socket for every peer.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::UdpSocket;

use murmur_core::wire::{HEADER_LEN, MAX_PAYLOAD};
use murmur_services::{Node, Transport};

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local: String,
}

impl UdpTransport {
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local = socket.local_addr()?.to_string();
        Ok(Self {
            socket: Arc::new(socket),
            local,
        })
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }
}

impl Transport for UdpTransport {
    fn local_address(&self) -> &str {
        &self.local
    }

    fn send_to(&self, address: &str, datagram: Bytes) -> io::Result<()> {
        let dest: SocketAddr = address
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{address}: {e}")))?;
        // WouldBlock surfaces as a transport error; the caller decides on retry
        self.socket.try_send_to(&datagram, dest).map(|_| ())
    }
}

/// Read datagrams forever and hand each to the node.
pub async fn receive_loop(socket: Arc<UdpSocket>, node: Node) -> Result<()> {
    let mut buf = vec![0u8; HEADER_LEN + MAX_PAYLOAD];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await.context("recv_from failed")?;
        let from = from.to_string();
        if let Err(e) = node.handle_datagram(&from, &buf[..n]).await {
            tracing::warn!(peer = %from, error = %e, "datagram dropped");
        }
    }
}
