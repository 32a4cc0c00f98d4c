// Replica placement repair.
//
// After the ring changes, every locally held key is re-checked against its
// new replica triple. Records this peer no longer owns are handed to the new
// primary and erased; retained records are re-typed in place; a primary
// pushes copies to newcomer successors and asks departed ones to drop
// theirs. Repair writes ride the normal CRUD message path under a reserved
// transaction-id range, and their replies are never quorum-accounted.

use crate::common::Address;
use crate::net::codec::{Message, Payload};
use crate::replication::{REPAIR_ID_BASE, REPLICATION_FACTOR};
use crate::ring::HashRing;
use crate::store::{KvStore, ReplicaRole};

/// Per-peer repair engine with the two neighbor caches that keep each epoch
/// O(keys) instead of O(keys x ring).
pub struct Stabilizer {
    self_addr: Address,

    /// The two ring successors of this peer as of the last epoch.
    has_my_replicas: Vec<Address>,

    /// The two ring predecessors of this peer as of the last epoch.
    have_replicas_of: Vec<Address>,

    next_repair_id: u32,
}

impl Stabilizer {
    pub fn new(self_addr: Address) -> Self {
        Self {
            self_addr,
            has_my_replicas: Vec::new(),
            have_replicas_of: Vec::new(),
            next_repair_id: REPAIR_ID_BASE,
        }
    }

    pub fn successors(&self) -> &[Address] {
        &self.has_my_replicas
    }

    pub fn predecessors(&self) -> &[Address] {
        &self.have_replicas_of
    }

    /// Repair replica placement against the freshly rebuilt ring. Returns
    /// the repair messages to send.
    pub fn stabilize(&mut self, ring: &HashRing, store: &mut KvStore) -> Vec<(Address, Message)> {
        let mut sends = Vec::new();

        if ring.len() >= REPLICATION_FACTOR {
            for key in store.keys() {
                self.stabilize_key(&key, ring, store, &mut sends);
            }
        }

        self.has_my_replicas = ring.successors_of(self.self_addr, REPLICATION_FACTOR - 1);
        self.have_replicas_of = ring.predecessors_of(self.self_addr, REPLICATION_FACTOR - 1);

        if !sends.is_empty() {
            tracing::info!(
                peer = %self.self_addr,
                repairs = sends.len(),
                "stabilization issued repair traffic"
            );
        }
        sends
    }

    fn stabilize_key(
        &mut self,
        key: &str,
        ring: &HashRing,
        store: &mut KvStore,
        sends: &mut Vec<(Address, Message)>,
    ) {
        let triple = ring.replicas_for(key);
        let position = triple.iter().position(|node| node.addr == self.self_addr);
        let Some(record) = store.read(key) else {
            return;
        };
        let old_role = record.role;
        let value = record.value.clone();

        match position {
            None => {
                // No longer a replica: hand the record to the new primary
                // and erase it locally.
                store.take(key);
                sends.push((
                    triple[0].addr,
                    self.repair_create(key, value, ReplicaRole::Primary),
                ));
            }
            Some(index) => {
                let new_role = ReplicaRole::from_index(index).unwrap_or(ReplicaRole::Tertiary);
                store.set_role(key, new_role);
                if new_role != ReplicaRole::Primary {
                    return;
                }

                // The primary guarantees its secondary and tertiary hold
                // copies. Which triple members already do depends on the
                // role this record had in the previous epoch; a duplicate
                // CREATE fails benignly, a missing one loses a replica.
                let holders = self.known_holders(old_role);
                for (slot, node) in triple.iter().enumerate().skip(1) {
                    if !holders.contains(&node.addr) {
                        let role = ReplicaRole::from_index(slot).unwrap_or(ReplicaRole::Tertiary);
                        sends.push((node.addr, self.repair_create(key, value.clone(), role)));
                    }
                }

                // Best-effort cleanup on old successors that fell out of the
                // triple but are still reachable.
                if old_role == ReplicaRole::Primary {
                    for old in self.has_my_replicas.clone() {
                        let still_replica = triple.iter().any(|node| node.addr == old);
                        if !still_replica && ring.contains(old) {
                            sends.push((old, self.repair_delete(key)));
                        }
                    }
                }
            }
        }
    }

    /// Peers that held a copy of a key this peer stored under `old_role`,
    /// as of the previous epoch. Old primary keys were mirrored on our two
    /// successors; a secondary sat between the primary (immediate
    /// predecessor) and the tertiary (immediate successor); a tertiary
    /// trailed both other replicas.
    fn known_holders(&self, old_role: ReplicaRole) -> Vec<Address> {
        match old_role {
            ReplicaRole::Primary => self.has_my_replicas.clone(),
            ReplicaRole::Secondary => {
                let mut holders = Vec::with_capacity(2);
                holders.extend(self.have_replicas_of.first().copied());
                holders.extend(self.has_my_replicas.first().copied());
                holders
            }
            ReplicaRole::Tertiary => self.have_replicas_of.clone(),
        }
    }

    fn repair_create(&mut self, key: &str, value: String, replica: ReplicaRole) -> Message {
        Message::new(
            self.next_id(),
            self.self_addr,
            Payload::KvCreate {
                key: key.to_string(),
                value,
                replica,
            },
        )
    }

    fn repair_delete(&mut self, key: &str) -> Message {
        Message::new(
            self.next_id(),
            self.self_addr,
            Payload::KvDelete {
                key: key.to_string(),
            },
        )
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_repair_id;
        self.next_repair_id = self.next_repair_id.checked_add(1).unwrap_or(REPAIR_ID_BASE);
        id
    }
}
