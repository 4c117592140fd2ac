//! Byte stream across nodes.

use murmur_services::SessionError;

use crate::{eventually, Mesh};

#[tokio::test]
async fn written_chunks_are_read_in_order() {
    let mesh = Mesh::new();
    let a = mesh.spawn("a", 1);
    let b = mesh.spawn("b", 2);

    let out = a.node.connect("b");
    let expected: Vec<u8> = (0..10u8).flat_map(|i| vec![i; 100]).collect();
    for chunk in expected.chunks(100) {
        out.write(chunk).unwrap();
    }

    let b_node = &b.node;
    assert!(eventually(move || async move { b_node.connection("a").is_some() }).await);
    let inbound = b.node.connection("a").unwrap();
    let mut got = Vec::new();
    let mut buf = [0u8; 64];
    while got.len() < expected.len() {
        let n = inbound.read(&mut buf).await.unwrap();
        got.extend_from_slice(&buf[..n]);
    }
    assert_eq!(got, expected);
}

#[tokio::test]
async fn reader_sees_close_after_draining() {
    let mesh = Mesh::new();
    let a = mesh.spawn("a", 1);
    let b = mesh.spawn("b", 2);

    a.node.connect("b").write(b"last words").unwrap();
    let b_node = &b.node;
    assert!(eventually(move || async move { b_node.connection("a").is_some() }).await);
    let inbound = b.node.connection("a").unwrap();

    let reader = {
        let inbound = inbound.clone();
        tokio::spawn(async move {
            let mut got = Vec::new();
            let mut buf = [0u8; 4];
            loop {
                match inbound.read(&mut buf).await {
                    Ok(n) => got.extend_from_slice(&buf[..n]),
                    Err(SessionError::ConnectionClosed(_)) => return got,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        })
    };
    // Let the reader consume and block before closing
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    inbound.close().await;

    assert_eq!(reader.await.unwrap(), b"last words");
}
