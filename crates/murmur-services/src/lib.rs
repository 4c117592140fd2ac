//! murmur-services: peer connections, freshness registries and the
//! discovery directory built on top of murmur-core.

pub mod connection;
pub mod directory;
pub mod error;
pub mod hooks;
pub mod node;
pub mod registry;
pub mod snapshot;
pub mod transport;

pub use connection::{Incoming, PeerConnection, RemoteIdentity};
pub use directory::{unix_now, Candidate, CandidateSource, PeerDirectory, SweepReport};
pub use error::SessionError;
pub use hooks::{ConnectionHooks, HookSet};
pub use node::{Node, NodeBuilder, SessionSettings};
pub use registry::{EntryHandle, Freshness, FreshnessHeap, FreshnessRegistry, NearbyRegistry, Pushed, RemoteRegistry};
pub use snapshot::DiscoverySnapshotBuilder;
pub use transport::{Datagram, MemoryNetwork, MemoryTransport, Transport};
