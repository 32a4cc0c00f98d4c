// QuorumKV - fault-tolerant peer-to-peer key-value store.
//
// Gossip-based membership with failure detection underneath a
// consistent-hash ring with three-way replication and 2-of-3 quorum reads
// and writes.

pub mod common;
pub mod error;
pub mod event;
pub mod membership;
pub mod net;
pub mod peer;
pub mod replication;
pub mod ring;
pub mod store;

pub use common::Address;
pub use error::{KvError, Result};
pub use peer::{Peer, PeerConfig};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
