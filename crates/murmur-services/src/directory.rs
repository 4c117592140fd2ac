//! Peer directory: both freshness registries plus the snapshot builder.
//!
//! Sweeps turn candidate lists into freshly signed entries. Received
//! snapshots are absorbed into the remote registry after every entry has
//! been checked against the announcing node's key.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use murmur_core::config::DiscoveryConfig;
use murmur_core::crypto::{CryptoError, SignatureScheme, PUBLIC_KEY_LEN};
use murmur_core::DiscoverySnapshot;

use crate::registry::{NearbyRegistry, RemoteRegistry};
use crate::snapshot::DiscoverySnapshotBuilder;

/// Seconds since the unix epoch, the unit of every sighting timestamp.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// How far ahead of the local clock an absorbed sighting may claim to be.
pub const MAX_CLOCK_SKEW_SECS: i64 = 30;

/// A directly reachable peer offered by a `CandidateSource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub address: String,
    pub public_key: [u8; PUBLIC_KEY_LEN],
}

/// Whatever knows which peers are around: a routing table, the live
/// connection set, a static list in tests.
pub trait CandidateSource: Send + Sync {
    fn nearby(&self) -> Vec<Candidate>;

    fn remote(&self) -> Vec<[u8; PUBLIC_KEY_LEN]> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries signed and pushed.
    pub signed: usize,
    /// Candidates dropped because signing failed.
    pub skipped: usize,
    /// Entries pushed out by the capacity bound.
    pub evicted: usize,
}

pub struct PeerDirectory {
    builder: DiscoverySnapshotBuilder,
    nearby: NearbyRegistry,
    remote: RemoteRegistry,
    local_key: [u8; PUBLIC_KEY_LEN],
}

impl PeerDirectory {
    pub fn new(signer: Arc<dyn SignatureScheme>, nearby_capacity: usize, remote_capacity: usize) -> Self {
        let local_key = signer.public_key();
        Self {
            builder: DiscoverySnapshotBuilder::new(signer),
            nearby: NearbyRegistry::new(nearby_capacity),
            remote: RemoteRegistry::new(remote_capacity),
            local_key,
        }
    }

    pub fn from_config(signer: Arc<dyn SignatureScheme>, config: &DiscoveryConfig) -> Self {
        Self::new(signer, config.nearby_capacity, config.remote_capacity)
    }

    pub fn nearby(&self) -> &NearbyRegistry {
        &self.nearby
    }

    pub fn remote(&self) -> &RemoteRegistry {
        &self.remote
    }

    /// Sign every candidate at `now` and push it.
    ///
    /// A signing failure skips that candidate only.
    pub async fn sweep(&self, source: &dyn CandidateSource, now: i64) -> SweepReport {
        let mut report = SweepReport::default();

        for candidate in source.nearby() {
            if candidate.public_key == self.local_key {
                continue;
            }
            match self
                .builder
                .nearby_entry(&candidate.address, &candidate.public_key, now)
            {
                Ok(entry) => {
                    report.signed += 1;
                    if self.nearby.push(entry).await.evicted.is_some() {
                        report.evicted += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = %candidate.address, error = %e, "skipping nearby candidate");
                    report.skipped += 1;
                }
            }
        }

        for key in source.remote() {
            if key == self.local_key {
                continue;
            }
            match self.builder.remote_entry(&key, now) {
                Ok(entry) => {
                    report.signed += 1;
                    if self.remote.push(entry).await.evicted.is_some() {
                        report.evicted += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = hex::encode(key), error = %e, "skipping remote candidate");
                    report.skipped += 1;
                }
            }
        }

        tracing::debug!(
            signed = report.signed,
            skipped = report.skipped,
            evicted = report.evicted,
            "discovery sweep"
        );
        report
    }

    pub async fn snapshot(&self) -> DiscoverySnapshot {
        self.builder.build(&self.nearby, &self.remote).await
    }

    pub async fn encode_snapshot(&self) -> Result<Vec<u8>, serde_json::Error> {
        self.builder.encode(&self.nearby, &self.remote).await
    }

    /// Learn identities from a peer's snapshot. Returns how many were recorded.
    ///
    /// Nothing is recorded unless every entry verifies against the
    /// snapshot's `ID`. Recorded identities are re-attested with the local
    /// key, so our own snapshot stays verifiable, and only replace what we
    /// hold when fresher. Sightings more than `MAX_CLOCK_SKEW_SECS` ahead of
    /// `now` are ignored, and the rest are attested no later than `now`.
    pub async fn absorb(&self, snapshot: &DiscoverySnapshot, now: i64) -> Result<usize, CryptoError> {
        snapshot.verify_entries()?;
        let announcer = snapshot.observer_key()?;

        let sightings = snapshot
            .nearby
            .iter()
            .map(|np| &np.sighting)
            .chain(snapshot.remote.iter().map(|rp| &rp.0));

        let mut recorded = 0;
        for sighting in sightings {
            let key = sighting.public_key.as_slice();
            if key.len() != PUBLIC_KEY_LEN || key == self.local_key || key == announcer {
                continue;
            }
            if self.nearby.find(key).await.is_some() {
                continue;
            }
            if sighting.ts > now.saturating_add(MAX_CLOCK_SKEW_SECS) {
                tracing::debug!(peer = hex::encode(key), ts = sighting.ts, "sighting from the future");
                continue;
            }
            match self.builder.remote_entry(key, sighting.ts.min(now)) {
                Ok(entry) => {
                    if self.remote.push_if_fresher(entry).await.is_some() {
                        recorded += 1;
                    }
                }
                Err(e) => tracing::warn!(peer = hex::encode(key), error = %e, "cannot attest remote peer"),
            }
        }

        if recorded > 0 {
            tracing::debug!(announcer = hex::encode(announcer), recorded, "absorbed snapshot");
        }
        Ok(recorded)
    }
}
