//! Request/reply and tell across nodes.

use std::time::Duration;

use murmur_core::Message;
use murmur_services::SessionError;

use crate::Mesh;

#[tokio::test]
async fn ping_round_trip() {
    let mesh = Mesh::new();
    let a = mesh.spawn("a", 1);
    let _b = mesh.spawn("b", 2);

    let conn = a.node.connect("b");
    let reply = conn.request(&Message::Ping, conn.request_timeout()).await.unwrap();
    assert_eq!(reply, Message::Pong);
    assert_eq!(conn.pending_requests(), 0);
}

#[tokio::test]
async fn reply_identifies_remote_peer() {
    let mesh = Mesh::new();
    let a = mesh.spawn("a", 1);
    let b = mesh.spawn("b", 2);

    let conn = a.node.connect("b");
    assert!(conn.remote().is_none());
    conn.request(&Message::Ping, Duration::from_secs(1)).await.unwrap();
    assert_eq!(conn.remote().unwrap().public_key, b.keypair.public);
    assert!(a.node.peer(&b.keypair.public).is_some());
}

#[tokio::test]
async fn concurrent_requests_get_their_own_replies() {
    let mesh = Mesh::new();
    let a = mesh.spawn("a", 1);
    let _b = mesh.spawn("b", 2);
    let conn = a.node.connect("b");

    let mut handles = Vec::new();
    for i in 0..32 {
        let conn = conn.clone();
        handles.push(tokio::spawn(async move {
            let text = format!("message {i}");
            let reply = conn
                .request(&Message::Chat(text.clone()), Duration::from_secs(2))
                .await
                .unwrap();
            (text, reply)
        }));
    }
    for h in handles {
        let (sent, reply) = h.await.unwrap();
        assert_eq!(reply, Message::Chat(sent.to_uppercase()));
    }
    assert_eq!(conn.pending_requests(), 0);
}

#[tokio::test]
async fn both_sides_can_request_at_once() {
    let mesh = Mesh::new();
    let a = mesh.spawn("a", 1);
    let b = mesh.spawn("b", 2);

    let ab = a.node.connect("b");
    let ba = b.node.connect("a");
    let msg_a = Message::Chat("from a".into());
    let msg_b = Message::Chat("from b".into());
    let (x, y) = tokio::join!(
        ab.request(&msg_a, Duration::from_secs(2)),
        ba.request(&msg_b, Duration::from_secs(2)),
    );
    assert_eq!(x.unwrap(), Message::Chat("FROM A".into()));
    assert_eq!(y.unwrap(), Message::Chat("FROM B".into()));
}

#[tokio::test]
async fn tell_is_delivered_without_reply() {
    let mesh = Mesh::new();
    let a = mesh.spawn("a", 1);
    let b = mesh.spawn("b", 2);

    a.node.connect("b").tell(&Message::Chat("hello".into())).unwrap();
    assert_eq!(b.next_chat().await.as_deref(), Some("hello"));
}

#[tokio::test]
async fn silent_peer_times_out() {
    let mesh = Mesh::new();
    let a = mesh.spawn("a", 1);
    // Bound but nobody is reading
    let (_transport, _inbound) = mesh.net.bind("quiet");

    let conn = a.node.connect("quiet");
    let err = conn
        .request(&Message::Ping, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::RequestTimeout { .. }));
    assert_eq!(conn.pending_requests(), 0);
}

#[tokio::test]
async fn unreachable_peer_is_a_transport_error() {
    let mesh = Mesh::new();
    let a = mesh.spawn("a", 1);
    let err = a
        .node
        .connect("nowhere")
        .request(&Message::Ping, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Transport { .. }));
}
