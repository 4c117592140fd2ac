//! Errors surfaced by peer connections and the node.

use std::time::Duration;

use murmur_core::crypto::CryptoError;
use murmur_core::wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport failed sending to {address}: {source}")]
    Transport {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("signing failed: {0}")]
    Signing(#[from] CryptoError),

    #[error("could not encode message: {0}")]
    Encode(WireError),

    #[error("could not decode datagram: {0}")]
    Decode(WireError),

    #[error("request {nonce} got no reply within {timeout:?}")]
    RequestTimeout { nonce: u64, timeout: Duration },

    #[error("connection to {0} is closed")]
    ConnectionClosed(String),

    #[error("peer at {address} presented key {presented}, expected {bound}")]
    IdentityMismatch {
        address: String,
        bound: String,
        presented: String,
    },
}

impl SessionError {
    /// Map envelope sealing failures, keeping signer errors distinct.
    pub(crate) fn from_seal(e: WireError) -> Self {
        match e {
            WireError::Signing(c) => SessionError::Signing(c),
            other => SessionError::Encode(other),
        }
    }
}
