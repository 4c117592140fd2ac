//! Typed messages and the opcode registry.
//!
//! The set of message types is closed: every variant of `Message` has a
//! fixed opcode, and decoding is a lookup in `MessageRegistry` followed by
//! a call to the registered decoder. Unknown opcodes are an error, never a
//! silent fallback.

use std::collections::HashMap;

use bytes::Bytes;

use crate::discovery::DiscoverySnapshot;
use crate::wire::WireError;

/// Opcode discriminator carried in `EnvelopeHeader::opcode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Stream = 1,
    Chat = 2,
    Discovery = 3,
    Ping = 4,
    Pong = 5,
}

impl Opcode {
    pub const ALL: [Opcode; 5] = [
        Opcode::Stream,
        Opcode::Chat,
        Opcode::Discovery,
        Opcode::Ping,
        Opcode::Pong,
    ];
}

impl TryFrom<u16> for Opcode {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Opcode::Stream),
            2 => Ok(Opcode::Chat),
            3 => Ok(Opcode::Discovery),
            4 => Ok(Opcode::Ping),
            5 => Ok(Opcode::Pong),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

impl From<Opcode> for u16 {
    fn from(op: Opcode) -> u16 {
        op as u16
    }
}

/// Every message a connection can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// One chunk of a continuous byte stream. No framing inside.
    Stream(Bytes),
    /// UTF-8 text.
    Chat(String),
    /// A signed peer-discovery snapshot.
    Discovery(DiscoverySnapshot),
    Ping,
    Pong,
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Stream(_) => Opcode::Stream,
            Message::Chat(_) => Opcode::Chat,
            Message::Discovery(_) => Opcode::Discovery,
            Message::Ping => Opcode::Ping,
            Message::Pong => Opcode::Pong,
        }
    }

    /// Serialize the payload that follows the envelope header.
    pub fn encode_payload(&self) -> Result<Bytes, WireError> {
        Ok(match self {
            Message::Stream(data) => data.clone(),
            Message::Chat(text) => Bytes::copy_from_slice(text.as_bytes()),
            Message::Discovery(snapshot) => Bytes::from(snapshot.to_json().map_err(|e| {
                WireError::Malformed {
                    opcode: Opcode::Discovery.into(),
                    reason: e.to_string(),
                }
            })?),
            Message::Ping | Message::Pong => Bytes::new(),
        })
    }
}

// ── Decoders ──────────────────────────────────────────────────────────────────

/// Turns a raw payload into a `Message`.
pub type Decoder = fn(&Bytes) -> Result<Message, WireError>;

fn decode_stream(payload: &Bytes) -> Result<Message, WireError> {
    Ok(Message::Stream(payload.clone()))
}

fn decode_chat(payload: &Bytes) -> Result<Message, WireError> {
    let text = std::str::from_utf8(payload).map_err(|e| WireError::Malformed {
        opcode: Opcode::Chat.into(),
        reason: e.to_string(),
    })?;
    Ok(Message::Chat(text.to_owned()))
}

fn decode_discovery(payload: &Bytes) -> Result<Message, WireError> {
    DiscoverySnapshot::from_json(payload)
        .map(Message::Discovery)
        .map_err(|e| WireError::Malformed {
            opcode: Opcode::Discovery.into(),
            reason: e.to_string(),
        })
}

fn decode_empty(message: Message, payload: &Bytes) -> Result<Message, WireError> {
    if payload.is_empty() {
        Ok(message)
    } else {
        Err(WireError::Malformed {
            opcode: message.opcode().into(),
            reason: format!("expected empty payload, got {} bytes", payload.len()),
        })
    }
}

fn decode_ping(payload: &Bytes) -> Result<Message, WireError> {
    decode_empty(Message::Ping, payload)
}

fn decode_pong(payload: &Bytes) -> Result<Message, WireError> {
    decode_empty(Message::Pong, payload)
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Maps opcodes to decoders.
#[derive(Clone)]
pub struct MessageRegistry {
    decoders: HashMap<u16, Decoder>,
}

impl MessageRegistry {
    /// An empty registry. Every decode fails until decoders are registered.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// A registry with every built-in message type.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for op in Opcode::ALL {
            let decoder: Decoder = match op {
                Opcode::Stream => decode_stream,
                Opcode::Chat => decode_chat,
                Opcode::Discovery => decode_discovery,
                Opcode::Ping => decode_ping,
                Opcode::Pong => decode_pong,
            };
            registry.decoders.insert(op.into(), decoder);
        }
        registry
    }

    /// Register a decoder. Registering the same opcode twice is an error.
    pub fn register(&mut self, opcode: Opcode, decoder: Decoder) -> Result<(), WireError> {
        let code = u16::from(opcode);
        if self.decoders.contains_key(&code) {
            return Err(WireError::DuplicateOpcode(code));
        }
        self.decoders.insert(code, decoder);
        Ok(())
    }

    pub fn is_registered(&self, opcode: u16) -> bool {
        self.decoders.contains_key(&opcode)
    }

    /// Look up the decoder for `opcode` and run it.
    pub fn decode(&self, opcode: u16, payload: &Bytes) -> Result<Message, WireError> {
        let decoder = self
            .decoders
            .get(&opcode)
            .ok_or(WireError::UnknownOpcode(opcode))?;
        decoder(payload)
    }
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
