//! Discovery broadcast: sweep, snapshot and gossip on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use murmur_core::Message;
use murmur_services::{unix_now, Candidate, CandidateSource, Node, PeerDirectory, SessionError};

/// Live, identified connections are the nearby candidates.
pub struct ConnectedPeers {
    node: Node,
}

impl ConnectedPeers {
    pub fn new(node: Node) -> Self {
        Self { node }
    }
}

impl CandidateSource for ConnectedPeers {
    fn nearby(&self) -> Vec<Candidate> {
        self.node
            .connections()
            .into_iter()
            .filter(|conn| !conn.is_closed())
            .filter_map(|conn| {
                conn.remote().map(|remote| Candidate {
                    address: conn.address().to_string(),
                    public_key: remote.public_key,
                })
            })
            .collect()
    }
}

/// One sweep and gossip round. Returns how many peers were sent the snapshot.
pub async fn broadcast_tick(
    node: &Node,
    directory: &PeerDirectory,
    source: &dyn CandidateSource,
) -> Result<usize, SessionError> {
    directory.sweep(source, unix_now()).await;
    let snapshot = directory.snapshot().await;
    let nearby = snapshot.nearby.len();
    let remote = snapshot.remote.len();
    let sent = node.broadcast(&Message::Discovery(snapshot))?;
    tracing::trace!(sent, nearby, remote, "discovery snapshot broadcast");
    Ok(sent)
}

/// Runs forever. Cancel by aborting the task.
pub async fn broadcast_loop(node: Node, directory: Arc<PeerDirectory>, interval: Duration) {
    let source = ConnectedPeers::new(node.clone());
    let mut ticker = time::interval(interval);

    tracing::info!(interval_secs = interval.as_secs(), "discovery broadcast starting");

    loop {
        ticker.tick().await;
        if let Err(e) = broadcast_tick(&node, &directory, &source).await {
            tracing::warn!(error = %e, "discovery tick skipped");
        }
    }
}
