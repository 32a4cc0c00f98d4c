// In-process transport.
//
// Delivers datagrams between peers of one process through per-address
// mailboxes. Supports the fault injection the tests and the simulation
// driver need: crashing a peer (all its traffic dropped) and severing a pair
// of addresses (a two-way partition).

use crate::common::Address;
use crate::net::Network;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};

/// Shared in-memory network.
#[derive(Default)]
pub struct MemoryNetwork {
    mailboxes: DashMap<Address, VecDeque<Bytes>>,
    crashed: RwLock<HashSet<Address>>,
    severed: RwLock<HashSet<(Address, Address)>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all future traffic to and from `addr` and discard anything
    /// already queued for it.
    pub fn crash(&self, addr: Address) {
        self.crashed.write().insert(addr);
        if let Some(mut mailbox) = self.mailboxes.get_mut(&addr) {
            mailbox.clear();
        }
        tracing::debug!(%addr, "network: peer crashed");
    }

    pub fn revive(&self, addr: Address) {
        self.crashed.write().remove(&addr);
    }

    /// Sever the link between two addresses in both directions.
    pub fn sever(&self, a: Address, b: Address) {
        let mut severed = self.severed.write();
        severed.insert((a, b));
        severed.insert((b, a));
    }

    pub fn heal(&self, a: Address, b: Address) {
        let mut severed = self.severed.write();
        severed.remove(&(a, b));
        severed.remove(&(b, a));
    }

    /// Datagrams currently queued for `addr`.
    pub fn pending(&self, addr: Address) -> usize {
        self.mailboxes.get(&addr).map(|q| q.len()).unwrap_or(0)
    }
}

impl Network for MemoryNetwork {
    fn send(&self, from: Address, to: Address, payload: Bytes) {
        {
            let crashed = self.crashed.read();
            if crashed.contains(&from) || crashed.contains(&to) {
                return;
            }
        }
        if self.severed.read().contains(&(from, to)) {
            return;
        }
        self.mailboxes
            .entry(to)
            .or_insert_with(VecDeque::new)
            .push_back(payload);
    }

    fn recv(&self, addr: Address) -> Vec<Bytes> {
        if self.crashed.read().contains(&addr) {
            return Vec::new();
        }
        match self.mailboxes.get_mut(&addr) {
            Some(mut mailbox) => mailbox.drain(..).collect(),
            None => Vec::new(),
        }
    }
}
