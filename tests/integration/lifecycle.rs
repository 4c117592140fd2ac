//! Connection lifecycle: hooks, close and reconnection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use murmur_core::crypto::Keypair;
use murmur_core::Message;
use murmur_services::{ConnectionHooks, Node, PeerConnection, SessionError};

use crate::{eventually, test_settings, Mesh};

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    transport_errors: AtomicUsize,
}

impl ConnectionHooks for Counters {
    fn on_connect(&self, _connection: &Arc<PeerConnection>) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect(&self, _connection: &PeerConnection) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_transport_error(&self, _connection: &PeerConnection, _error: &SessionError) {
        self.transport_errors.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn hooks_track_connection_lifecycle() {
    let mesh = Mesh::new();
    let _b = mesh.spawn("b", 2);
    let (transport, inbound) = mesh.net.bind("a");
    let counters = Arc::new(Counters::default());
    let a = Node::builder(Arc::new(Keypair::from_seed([1; 32])), transport)
        .hook(counters.clone())
        .settings(test_settings())
        .build();
    a.spawn_inbound(inbound);

    let first = a.connect("b");
    let conn = a.connect("b");
    assert!(Arc::ptr_eq(&first, &conn));
    assert_eq!(counters.connects.load(Ordering::SeqCst), 1);

    conn.request(&Message::Ping, conn.request_timeout()).await.unwrap();

    mesh.net.unbind("b");
    assert!(conn.tell(&Message::Ping).is_err());
    assert_eq!(counters.transport_errors.load(Ordering::SeqCst), 1);

    conn.close().await;
    conn.close().await;
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(a.connection_count(), 0);
}

#[tokio::test]
async fn closed_connection_fails_fast() {
    let mesh = Mesh::new();
    let a = mesh.spawn("a", 1);
    let _b = mesh.spawn("b", 2);

    let conn = a.node.connect("b");
    conn.close().await;
    assert!(matches!(
        conn.request(&Message::Ping, conn.request_timeout()).await,
        Err(SessionError::ConnectionClosed(_))
    ));
    assert!(matches!(conn.write(b"x"), Err(SessionError::ConnectionClosed(_))));
}

#[tokio::test]
async fn peer_reconnects_after_close() {
    let mesh = Mesh::new();
    let a = mesh.spawn("a", 1);
    let b = mesh.spawn("b", 2);

    let conn = a.node.connect("b");
    conn.request(&Message::Ping, conn.request_timeout()).await.unwrap();
    let b_node = &b.node;
    assert!(eventually(move || async move { b_node.connection("a").is_some() }).await);

    // b drops its side; a's next request opens a fresh one on b
    let stale = b.node.connection("a").unwrap();
    stale.close().await;
    assert!(b.node.connection("a").is_none());

    conn.request(&Message::Ping, conn.request_timeout()).await.unwrap();
    let fresh = b.node.connection("a").unwrap();
    assert!(!Arc::ptr_eq(&stale, &fresh));
    assert_eq!(fresh.remote().unwrap().public_key, a.keypair.public);
}
