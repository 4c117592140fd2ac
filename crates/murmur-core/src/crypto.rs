//! Cryptographic primitives for murmur.
//!
//! Provides three things:
//!   1. BLAKE3 hashing: peer IDs derived from public keys
//!   2. The `SignatureScheme` capability every signing call goes through
//!   3. An Ed25519 keypair implementing that capability
//!
//! The session layer never touches key material directly. It calls
//! `SignatureScheme::sign` and the free `verify` function, so a node can
//! swap the keypair for an HSM- or agent-backed signer without touching
//! connection or discovery code.

use std::path::Path;

use ed25519_dalek::{Signer, Verifier};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length of an Ed25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Derive the peer ID used to key the node's peer table.
///
///   peer_id = BLAKE3(public_key)
pub fn peer_id(public_key: &[u8; PUBLIC_KEY_LEN]) -> [u8; 32] {
    hash(public_key)
}

// ── Signature capability ──────────────────────────────────────────────────────

/// The signing capability handed to connections and the snapshot builder.
pub trait SignatureScheme: Send + Sync {
    /// Public half of the signing key.
    fn public_key(&self) -> [u8; PUBLIC_KEY_LEN];

    /// Sign an arbitrary message.
    fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LEN], CryptoError>;
}

/// Verify an Ed25519 signature produced by `public_key` over `message`.
///
/// `signature` is a slice so callers can pass bytes straight off the wire;
/// anything other than 64 bytes is rejected.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let key: [u8; PUBLIC_KEY_LEN] = public_key
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength(public_key.len()))?;
    let sig: [u8; SIGNATURE_LEN] = signature
        .try_into()
        .map_err(|_| CryptoError::InvalidSignatureLength(signature.len()))?;

    let verifying =
        ed25519_dalek::VerifyingKey::from_bytes(&key).map_err(|_| CryptoError::InvalidPublicKey)?;
    verifying
        .verify(message, &ed25519_dalek::Signature::from_bytes(&sig))
        .map_err(|_| CryptoError::BadSignature)
}

// ── Keypair ───────────────────────────────────────────────────────────────────

/// A node's long-term Ed25519 identity.
///
/// Generated once per node and stored as a 32-byte seed. The public key is
/// the node's identity on the wire. The seed never leaves this struct except
/// through `seed_bytes` for persistence.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    /// Secret seed: zeroized on drop, never exposed directly.
    seed: Zeroizing<[u8; 32]>,
    /// Public key: the node identity.
    pub public: [u8; PUBLIC_KEY_LEN],
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut seed[..]);
        Self::from_seed(*seed)
    }

    /// Reconstruct a keypair from stored seed bytes.
    /// The public key is derived deterministically from the seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing = ed25519_dalek::SigningKey::from_bytes(&seed);
        Self {
            seed: Zeroizing::new(seed),
            public: signing.verifying_key().to_bytes(),
        }
    }

    /// Serialize the seed for persistent storage.
    pub fn seed_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(*self.seed)
    }

    /// Load the seed at `path`, or generate a keypair and write it there.
    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let seed = Zeroizing::new(bytes);
                let seed: [u8; 32] = seed
                    .as_slice()
                    .try_into()
                    .map_err(|_| CryptoError::InvalidKeyLength(seed.len()))?;
                Ok(Self::from_seed(seed))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let keypair = Self::generate();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(CryptoError::KeyStore)?;
                }
                std::fs::write(path, keypair.seed_bytes().as_slice())
                    .map_err(CryptoError::KeyStore)?;
                Ok(keypair)
            }
            Err(e) => Err(CryptoError::KeyStore(e)),
        }
    }

    fn signing_key(&self) -> ed25519_dalek::SigningKey {
        ed25519_dalek::SigningKey::from_bytes(&self.seed)
    }
}

impl SignatureScheme for Keypair {
    fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public
    }

    fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LEN], CryptoError> {
        Ok(self.signing_key().sign(message).to_bytes())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: {0}")]
    InvalidKeyLength(usize),

    #[error("invalid signature length: {0}")]
    InvalidSignatureLength(usize),

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("signature verification failed")]
    BadSignature,

    #[error("signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("key store: {0}")]
    KeyStore(std::io::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
