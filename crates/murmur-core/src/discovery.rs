//! Peer-discovery payload: the signed sightings a node gossips.
//!
//! A `Sighting` asserts "the announcing node observed this identity at this
//! time". It is signed by the *observing* node over
//!
//!   "<ts>:<lowercase hex(public_key)>"
//!
//! so a receiver authenticates each entry against the snapshot's `ID`, not
//! against the listed peer's own key.
//!
//! JSON layout (field names are part of the protocol):
//!
//!   {"ID": "<hex>",
//!    "NP": [{"Address": "..", "PublicKey": "<b64>", "Sign": "<b64>", "Ts": 0}],
//!    "RP": [{"PublicKey": "<b64>", "Sign": "<b64>", "Ts": 0}]}

use serde::{Deserialize, Deserializer, Serialize};

use crate::crypto::{self, CryptoError, PUBLIC_KEY_LEN};

/// The canonical string a sighting signature covers.
pub fn attestation_message(ts: i64, public_key: &[u8]) -> String {
    format!("{}:{}", ts, hex::encode(public_key))
}

// ── Entries ───────────────────────────────────────────────────────────────────

/// Identity, signature and timestamp of one observed peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sighting {
    #[serde(rename = "PublicKey", with = "base64_bytes")]
    pub public_key: Vec<u8>,

    #[serde(rename = "Sign", with = "base64_bytes")]
    pub sign: Vec<u8>,

    /// Unix seconds at which the peer was observed.
    #[serde(rename = "Ts")]
    pub ts: i64,
}

impl Sighting {
    /// Check the signature against the node that made the observation.
    pub fn verify(&self, observer: &[u8]) -> Result<(), CryptoError> {
        crypto::verify(
            observer,
            attestation_message(self.ts, &self.public_key).as_bytes(),
            &self.sign,
        )
    }
}

/// A peer reachable directly, with its transport address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearbyPeer {
    #[serde(rename = "Address")]
    pub address: String,

    #[serde(flatten)]
    pub sighting: Sighting,
}

/// A peer known only by identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemotePeer(pub Sighting);

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// The broadcast payload: announcing node plus both peer lists.
///
/// List order is the registries' internal heap order. Only the first entry
/// is meaningful (the oldest); consumers must not assume the rest is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverySnapshot {
    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "NP", default, deserialize_with = "null_as_empty")]
    pub nearby: Vec<NearbyPeer>,

    #[serde(rename = "RP", default, deserialize_with = "null_as_empty")]
    pub remote: Vec<RemotePeer>,
}

impl DiscoverySnapshot {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Decode into an existing snapshot.
    ///
    /// Both lists are replaced. The identity is only replaced when the
    /// payload carries a non-empty `ID`; otherwise the current one is kept.
    pub fn merge_json(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        let decoded = Self::from_json(bytes)?;
        if !decoded.id.is_empty() {
            self.id = decoded.id;
        }
        self.nearby = decoded.nearby;
        self.remote = decoded.remote;
        Ok(())
    }

    /// Decode the hex `ID` into the announcing node's public key.
    pub fn observer_key(&self) -> Result<[u8; PUBLIC_KEY_LEN], CryptoError> {
        let bytes = hex::decode(&self.id).map_err(|_| CryptoError::InvalidPublicKey)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))
    }

    /// Verify every entry against the announcing node's key.
    ///
    /// Fails on the first entry that does not verify.
    pub fn verify_entries(&self) -> Result<(), CryptoError> {
        let observer = self.observer_key()?;
        for np in &self.nearby {
            np.sighting.verify(&observer)?;
        }
        for rp in &self.remote {
            rp.0.verify(&observer)?;
        }
        Ok(())
    }
}

// ── Serde helpers ─────────────────────────────────────────────────────────────

/// Raw bytes as standard base64 strings.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Peers encoding an empty list as `null` are accepted.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
