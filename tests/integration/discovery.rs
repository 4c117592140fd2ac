//! Discovery gossip over a three-node line: a ─ b ─ c.

use murmur_core::{DiscoverySnapshot, Message};
use murmur_services::{unix_now, Candidate, CandidateSource, Node};

use crate::{eventually, Mesh, TestNode};

struct Connected<'a>(&'a Node);

impl CandidateSource for Connected<'_> {
    fn nearby(&self) -> Vec<Candidate> {
        self.0
            .connections()
            .into_iter()
            .filter_map(|c| {
                c.remote().map(|r| Candidate {
                    address: c.address().to_string(),
                    public_key: r.public_key,
                })
            })
            .collect()
    }
}

async fn line(mesh: &Mesh) -> (TestNode, TestNode, TestNode) {
    let a = mesh.spawn("a", 1);
    let b = mesh.spawn("b", 2);
    let c = mesh.spawn("c", 3);
    for (from, to) in [(&a, "b"), (&c, "b")] {
        let conn = from.node.connect(to);
        conn.request(&Message::Ping, conn.request_timeout()).await.unwrap();
    }
    (a, b, c)
}

#[tokio::test]
async fn middle_node_introduces_its_neighbours() {
    let mesh = Mesh::new();
    let (a, b, c) = line(&mesh).await;

    let report = b.directory.sweep(&Connected(&b.node), unix_now()).await;
    assert_eq!(report.signed, 2);
    let sent = b.node.broadcast(&Message::Discovery(b.directory.snapshot().await)).unwrap();
    assert_eq!(sent, 2);

    let a_dir = a.directory.clone();
    let c_key = c.keypair.public;
    assert!(eventually(move || {
        let a_dir = a_dir.clone();
        async move { a_dir.remote().ts_of(&c_key).await.is_some() }
    })
    .await);

    // a re-attested c with its own key, so a's snapshot verifies as a's
    let snap = a.directory.snapshot().await;
    assert_eq!(snap.id, hex::encode(a.keypair.public));
    assert!(snap.verify_entries().is_ok());
    assert!(snap.remote.iter().any(|rp| rp.0.public_key == c_key));
}

#[tokio::test]
async fn relayed_snapshot_round_trips_json() {
    let mesh = Mesh::new();
    let (_a, b, _c) = line(&mesh).await;
    b.directory.sweep(&Connected(&b.node), 1_700_000_000).await;

    let bytes = b.directory.encode_snapshot().await.unwrap();
    let decoded = DiscoverySnapshot::from_json(&bytes).unwrap();
    assert_eq!(decoded.id, hex::encode(b.keypair.public));
    assert_eq!(decoded.nearby.len(), 2);
    assert!(decoded.nearby.iter().all(|np| np.sighting.ts == 1_700_000_000));

    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(value["NP"][0]["Address"].is_string());
}

#[tokio::test]
async fn forged_snapshot_is_ignored() {
    let mesh = Mesh::new();
    let (a, b, _c) = line(&mesh).await;
    b.directory.sweep(&Connected(&b.node), unix_now()).await;

    let mut forged = b.directory.snapshot().await;
    forged.nearby[0].sighting.public_key = vec![0xEE; 32];
    a.node.connect("b").tell(&Message::Discovery(forged.clone())).unwrap();
    let _ = a.directory.absorb(&forged, unix_now()).await;

    // Give b's responder time to process the tell
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(a.directory.remote().ts_of(&[0xEE; 32]).await, None);
    assert_eq!(b.directory.remote().ts_of(&[0xEE; 32]).await, None);
}
