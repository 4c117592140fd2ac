//! Discovery snapshot builder.
//!
//! Signs sightings with the local key and assembles both registries plus
//! the local identity into a `DiscoverySnapshot` ready for broadcast.

use std::sync::Arc;

use murmur_core::crypto::{CryptoError, SignatureScheme};
use murmur_core::discovery::attestation_message;
use murmur_core::{DiscoverySnapshot, NearbyPeer, RemotePeer, Sighting};

use crate::registry::{NearbyRegistry, RemoteRegistry};

pub struct DiscoverySnapshotBuilder {
    signer: Arc<dyn SignatureScheme>,
}

impl DiscoverySnapshotBuilder {
    pub fn new(signer: Arc<dyn SignatureScheme>) -> Self {
        Self { signer }
    }

    /// Hex public key, as carried in the snapshot's `ID`.
    pub fn identity(&self) -> String {
        hex::encode(self.signer.public_key())
    }

    /// Attest that `public_key` was seen at `now`.
    pub fn sign_entry(&self, public_key: &[u8], now: i64) -> Result<Sighting, CryptoError> {
        let sign = self
            .signer
            .sign(attestation_message(now, public_key).as_bytes())?;
        Ok(Sighting {
            public_key: public_key.to_vec(),
            sign: sign.to_vec(),
            ts: now,
        })
    }

    pub fn nearby_entry(
        &self,
        address: &str,
        public_key: &[u8],
        now: i64,
    ) -> Result<NearbyPeer, CryptoError> {
        Ok(NearbyPeer {
            address: address.to_string(),
            sighting: self.sign_entry(public_key, now)?,
        })
    }

    pub fn remote_entry(&self, public_key: &[u8], now: i64) -> Result<RemotePeer, CryptoError> {
        self.sign_entry(public_key, now).map(RemotePeer)
    }

    /// Point-in-time view of both registries. Each is copied under its own lock.
    pub async fn build(&self, nearby: &NearbyRegistry, remote: &RemoteRegistry) -> DiscoverySnapshot {
        DiscoverySnapshot {
            id: self.identity(),
            nearby: nearby.entries().await,
            remote: remote.entries().await,
        }
    }

    /// `build` followed by JSON encoding.
    pub async fn encode(
        &self,
        nearby: &NearbyRegistry,
        remote: &RemoteRegistry,
    ) -> Result<Vec<u8>, serde_json::Error> {
        self.build(nearby, remote).await.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::crypto::Keypair;

    struct BrokenSigner;

    impl SignatureScheme for BrokenSigner {
        fn public_key(&self) -> [u8; 32] {
            [0; 32]
        }

        fn sign(&self, _message: &[u8]) -> Result<[u8; 64], CryptoError> {
            Err(CryptoError::SignerUnavailable("hardware token removed".into()))
        }
    }

    #[test]
    fn signed_entry_verifies_against_local_key() {
        let kp = Arc::new(Keypair::from_seed([4; 32]));
        let builder = DiscoverySnapshotBuilder::new(kp.clone());
        let entry = builder.sign_entry(&[0xAB; 32], 1_700_000_000).unwrap();
        assert_eq!(entry.ts, 1_700_000_000);
        assert!(entry.verify(&kp.public).is_ok());
    }

    #[test]
    fn signer_failure_surfaces() {
        let builder = DiscoverySnapshotBuilder::new(Arc::new(BrokenSigner));
        assert!(matches!(
            builder.sign_entry(&[1; 32], 5),
            Err(CryptoError::SignerUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_carries_identity_and_both_lists() {
        let kp = Arc::new(Keypair::from_seed([4; 32]));
        let builder = DiscoverySnapshotBuilder::new(kp.clone());
        let nearby = NearbyRegistry::new(4);
        let remote = RemoteRegistry::new(4);
        nearby
            .push(builder.nearby_entry("127.0.0.1:3001", &[1; 32], 10).unwrap())
            .await;
        remote.push(builder.remote_entry(&[2; 32], 20).unwrap()).await;
        remote.push(builder.remote_entry(&[3; 32], 15).unwrap()).await;

        let snap = builder.build(&nearby, &remote).await;
        assert_eq!(snap.id, hex::encode(kp.public));
        assert_eq!(snap.nearby.len(), 1);
        assert_eq!(snap.remote.len(), 2);
        // Only the head of each list is ordered
        assert_eq!(snap.remote[0].0.ts, 15);
        assert!(snap.verify_entries().is_ok());

        let decoded = DiscoverySnapshot::from_json(&builder.encode(&nearby, &remote).await.unwrap()).unwrap();
        assert_eq!(decoded, snap);
    }

    #[tokio::test]
    async fn empty_registries_encode_empty_lists() {
        let builder = DiscoverySnapshotBuilder::new(Arc::new(Keypair::from_seed([4; 32])));
        let bytes = builder
            .encode(&NearbyRegistry::new(1), &RemoteRegistry::new(1))
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["NP"], serde_json::json!([]));
        assert_eq!(value["RP"], serde_json::json!([]));
    }
}
