//! murmur wire format: the envelope every message travels in.
//!
//! One datagram carries exactly one envelope: a fixed 112-byte header
//! followed by the opcode-specific payload. The header identifies the
//! sender, authenticates the payload and carries the request/reply nonce.
//!
//! The header is #[repr(C, packed)] with zerocopy derives for safe,
//! allocation-free serialization. There is no unsafe code in this module.

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::crypto::{CryptoError, SignatureScheme, PUBLIC_KEY_LEN, SIGNATURE_LEN};

// ── Envelope Header ──────────────────────────────────────────────────────────

/// Precedes every payload on the wire.
///
/// Wire size: 112 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct EnvelopeHeader {
    /// Ed25519 public key of the sending node.
    pub sender: [u8; PUBLIC_KEY_LEN],

    /// Signature by `sender` over `signing_input(opcode, nonce, flags, payload)`.
    pub signature: [u8; SIGNATURE_LEN],

    /// Request/reply correlation. 0 for unsolicited messages.
    pub nonce: u64,

    /// Message type, see `message::Opcode`.
    pub opcode: u16,

    /// Length of the payload in bytes, not including this header.
    pub length: u32,

    /// Bit flags:
    ///   bit    0: this envelope answers a request carrying the same nonce
    ///   bits 1-7: reserved, must be zero
    pub flags: u8,

    /// Wire format version. Currently 0x01.
    pub version: u8,
}

assert_eq_size!(EnvelopeHeader, [u8; 112]);

/// Header size in bytes.
pub const HEADER_LEN: usize = std::mem::size_of::<EnvelopeHeader>();

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 0x01;

/// Flag bit marking an envelope as a reply.
pub const FLAG_REPLY: u8 = 0x01;

const RESERVED_FLAGS: u8 = !FLAG_REPLY;

/// Maximum payload size in bytes. Keeps one envelope inside one UDP datagram.
pub const MAX_PAYLOAD: usize = 65_000;

/// The exact bytes the envelope signature covers.
///
///   opcode (u16 LE) || nonce (u64 LE) || flags (u8) || payload
pub fn signing_input(opcode: u16, nonce: u64, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(11 + payload.len());
    buf.extend_from_slice(&opcode.to_le_bytes());
    buf.extend_from_slice(&nonce.to_le_bytes());
    buf.push(flags);
    buf.extend_from_slice(payload);
    buf
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// A decoded envelope with its header fields unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: [u8; PUBLIC_KEY_LEN],
    pub signature: [u8; SIGNATURE_LEN],
    pub nonce: u64,
    pub opcode: u16,
    pub flags: u8,
    pub payload: Bytes,
}

impl Envelope {
    /// Build and sign an envelope with the given signer.
    pub fn seal(
        signer: &dyn SignatureScheme,
        opcode: u16,
        nonce: u64,
        flags: u8,
        payload: Bytes,
    ) -> Result<Self, WireError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload.len()));
        }
        let signature = signer.sign(&signing_input(opcode, nonce, flags, &payload))?;
        Ok(Self {
            sender: signer.public_key(),
            signature,
            nonce,
            opcode,
            flags,
            payload,
        })
    }

    /// Whether this envelope answers one of our requests.
    pub fn is_reply(&self) -> bool {
        self.flags & FLAG_REPLY != 0
    }

    /// Check the signature against the sender key carried in the header.
    pub fn verify(&self) -> Result<(), CryptoError> {
        crate::crypto::verify(
            &self.sender,
            &signing_input(self.opcode, self.nonce, self.flags, &self.payload),
            &self.signature,
        )
    }

    /// Serialize header and payload into a single datagram.
    pub fn encode(&self) -> Vec<u8> {
        let header = EnvelopeHeader {
            sender: self.sender,
            signature: self.signature,
            nonce: self.nonce,
            opcode: self.opcode,
            length: self.payload.len() as u32,
            flags: self.flags,
            version: ENVELOPE_VERSION,
        };
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a datagram. Does not verify the signature.
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        let header =
            EnvelopeHeader::read_from_prefix(datagram).ok_or(WireError::Truncated(datagram.len()))?;

        // Copy packed fields to locals to avoid unaligned references
        let version = header.version;
        let flags = header.flags;
        let length = header.length as usize;

        if version != ENVELOPE_VERSION {
            return Err(WireError::UnknownVersion(version));
        }
        if flags & RESERVED_FLAGS != 0 {
            return Err(WireError::ReservedFlagsSet(flags));
        }
        if length > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(length));
        }
        let body = &datagram[HEADER_LEN..];
        if body.len() != length {
            return Err(WireError::LengthMismatch {
                declared: length,
                actual: body.len(),
            });
        }

        Ok(Self {
            sender: header.sender,
            signature: header.signature,
            nonce: header.nonce,
            opcode: header.opcode,
            flags,
            payload: Bytes::copy_from_slice(body),
        })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("datagram too short for envelope header: {0} bytes")]
    Truncated(usize),

    #[error("unknown envelope version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("header declares {declared} payload bytes, datagram carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("unknown opcode: {0}")]
    UnknownOpcode(u16),

    #[error("opcode {0} is already registered")]
    DuplicateOpcode(u16),

    #[error("malformed {opcode} payload: {reason}")]
    Malformed { opcode: u16, reason: String },

    #[error("signing failed: {0}")]
    Signing(#[from] CryptoError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
