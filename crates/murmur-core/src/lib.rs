//! murmur-core: shared types, wire format, and cryptographic primitives.
//! All other murmur crates depend on this one.

pub mod config;
pub mod crypto;
pub mod discovery;
pub mod message;
pub mod wire;

pub use discovery::{DiscoverySnapshot, NearbyPeer, RemotePeer, Sighting};
pub use message::{Message, MessageRegistry, Opcode};
