// Failure detector engine.
//
// Drives the per-tick membership duties: advance the local heartbeat, sweep
// the list for silent members, gossip the list to a random fanout. Incoming
// join and gossip traffic is merged under the heartbeat rule: an entry only
// moves forward, never back.

use crate::common::{Address, Tick};
use crate::event::{Event, EventKind, EventLog};
use crate::membership::{MemberEntry, MembershipConfig};
use crate::net::codec::{Message, Payload};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

/// Membership-side state machine for one peer.
///
/// The owner's identity is the explicit `self_addr`; the member list holds
/// only remote peers and the self entry is derived on demand when the list is
/// shipped out.
pub struct FailureDetector {
    self_addr: Address,
    config: MembershipConfig,

    /// Heartbeat this peer advertises about itself.
    heartbeat: i64,

    /// Local tick at which the self heartbeat last advanced.
    last_refresh: Tick,

    /// True once the peer has been admitted to the group (immediately for
    /// the introducer, on JoinRep receipt for everyone else).
    in_group: bool,

    /// Remote members in insertion order.
    members: Vec<MemberEntry>,

    /// Ids currently in the failure-pending state. Always a subset of
    /// `members` ids.
    suspected: HashSet<u32>,

    rng: StdRng,
}

impl FailureDetector {
    pub fn new(self_addr: Address, config: MembershipConfig, seed: u64, now: Tick) -> Self {
        let in_group = self_addr == config.introducer;
        if in_group {
            tracing::info!(peer = %self_addr, "starting up group as introducer");
        }
        Self {
            self_addr,
            config,
            heartbeat: 0,
            last_refresh: now,
            in_group,
            members: Vec::new(),
            suspected: HashSet::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Introduction step: the introducer is already in the group; everyone
    /// else announces itself and must wait for the JoinRep.
    pub fn join_request(&self) -> Option<(Address, Message)> {
        if self.in_group {
            return None;
        }
        let msg = Message::new(
            0,
            self.self_addr,
            Payload::JoinReq {
                addr: self.self_addr,
                heartbeat: self.heartbeat,
            },
        );
        tracing::debug!(peer = %self.self_addr, introducer = %self.config.introducer, "sending join request");
        Some((self.config.introducer, msg))
    }

    pub fn in_group(&self) -> bool {
        self.in_group
    }

    /// All members not currently suspected, self first, in insertion order.
    /// Stable within a tick.
    pub fn live_peers(&self) -> Vec<Address> {
        let mut peers = Vec::with_capacity(self.members.len() + 1);
        peers.push(self.self_addr);
        peers.extend(
            self.members
                .iter()
                .filter(|e| !self.suspected.contains(&e.id))
                .map(|e| e.addr()),
        );
        peers
    }

    /// Snapshot of the remote member list (tests and diagnostics).
    pub fn members(&self) -> &[MemberEntry] {
        &self.members
    }

    pub fn is_suspected(&self, id: u32) -> bool {
        self.suspected.contains(&id)
    }

    /// One protocol period: heartbeat, failure sweep, gossip. Returns the
    /// messages to put on the wire.
    pub fn tick(&mut self, now: Tick, events: &dyn EventLog) -> Vec<(Address, Message)> {
        self.heartbeat += 1;
        self.last_refresh = now;
        self.sweep(now, events);
        self.gossip()
    }

    /// Suspect members silent past `t_fail`; evict past `t_remove`.
    ///
    /// The removal event fires when an entry first becomes suspected, not at
    /// eviction, and is never emitted twice for one failure.
    fn sweep(&mut self, now: Tick, events: &dyn EventLog) {
        let t_fail = self.config.t_fail;
        let t_remove = self.config.t_remove;

        let mut evicted: Vec<MemberEntry> = Vec::new();
        let mut newly_suspected: Vec<MemberEntry> = Vec::new();

        self.members.retain(|entry| {
            let silence = now - entry.last_seen;
            if silence > t_remove {
                evicted.push(*entry);
                false
            } else {
                true
            }
        });

        for entry in &self.members {
            let silence = now - entry.last_seen;
            if silence > t_fail && !self.suspected.contains(&entry.id) {
                newly_suspected.push(*entry);
            }
        }

        for entry in evicted {
            self.suspected.remove(&entry.id);
            tracing::info!(peer = %self.self_addr, member = %entry.addr(), "evicted silent member");
        }

        for entry in newly_suspected {
            self.suspected.insert(entry.id);
            tracing::warn!(peer = %self.self_addr, member = %entry.addr(), "member suspected");
            events.append(Event {
                observer: self.self_addr,
                kind: EventKind::NodeRemove {
                    removed: entry.addr(),
                },
            });
        }
    }

    /// Pick up to `fanout` distinct non-suspected members and send each the
    /// current list (suspected ids withheld).
    fn gossip(&mut self) -> Vec<(Address, Message)> {
        let eligible: Vec<Address> = self
            .members
            .iter()
            .filter(|e| !self.suspected.contains(&e.id))
            .map(|e| e.addr())
            .collect();
        if eligible.is_empty() {
            return Vec::new();
        }

        let snapshot = self.shareable_list();
        let amount = self.config.fanout.min(eligible.len());
        let picks = rand::seq::index::sample(&mut self.rng, eligible.len(), amount);

        picks
            .into_iter()
            .map(|i| {
                let target = eligible[i];
                let msg = Message::new(
                    0,
                    self.self_addr,
                    Payload::Gossip {
                        members: snapshot.clone(),
                    },
                );
                (target, msg)
            })
            .collect()
    }

    /// The list as shipped to other peers: the derived self entry followed by
    /// every non-suspected remote entry. The count is accurate by
    /// construction.
    fn shareable_list(&self) -> Vec<MemberEntry> {
        let mut list = Vec::with_capacity(self.members.len() + 1);
        list.push(MemberEntry {
            id: self.self_addr.id,
            port: self.self_addr.port,
            heartbeat: self.heartbeat,
            last_seen: self.last_refresh,
        });
        list.extend(
            self.members
                .iter()
                .filter(|e| !self.suspected.contains(&e.id))
                .copied(),
        );
        list
    }

    /// A new peer announced itself: admit it and answer with our list so it
    /// learns the cluster in one round.
    pub fn handle_join_req(
        &mut self,
        addr: Address,
        heartbeat: i64,
        now: Tick,
        events: &dyn EventLog,
    ) -> (Address, Message) {
        self.merge_entry(
            MemberEntry {
                id: addr.id,
                port: addr.port,
                heartbeat,
                last_seen: now,
            },
            now,
            events,
        );
        let reply = Message::new(
            0,
            self.self_addr,
            Payload::JoinRep {
                members: self.shareable_list(),
            },
        );
        (addr, reply)
    }

    /// Admission confirmed; adopt whatever list the introducer sent along.
    pub fn handle_join_rep(&mut self, members: Vec<MemberEntry>, now: Tick, events: &dyn EventLog) {
        if !self.in_group {
            tracing::info!(peer = %self.self_addr, "joined the group");
        }
        self.in_group = true;
        self.merge(members, now, events);
    }

    pub fn handle_gossip(&mut self, members: Vec<MemberEntry>, now: Tick, events: &dyn EventLog) {
        self.merge(members, now, events);
    }

    /// Merge rule, applied entry-wise to incoming lists:
    /// suspected ids are dropped, a known id only advances on a strictly
    /// greater heartbeat, an unknown id is inserted with the incoming
    /// heartbeat and freshly stamped `last_seen`.
    fn merge(&mut self, incoming: Vec<MemberEntry>, now: Tick, events: &dyn EventLog) {
        for entry in incoming {
            self.merge_entry(entry, now, events);
        }
    }

    fn merge_entry(&mut self, incoming: MemberEntry, now: Tick, events: &dyn EventLog) {
        // Never let gossip overwrite our own heartbeat.
        if incoming.id == self.self_addr.id {
            return;
        }
        if self.suspected.contains(&incoming.id) {
            return;
        }
        match self.members.iter_mut().find(|e| e.id == incoming.id) {
            Some(existing) => {
                if incoming.heartbeat > existing.heartbeat {
                    existing.heartbeat = incoming.heartbeat;
                    existing.last_seen = now;
                }
            }
            None => {
                let entry = MemberEntry {
                    id: incoming.id,
                    port: incoming.port,
                    heartbeat: incoming.heartbeat,
                    last_seen: now,
                };
                self.members.push(entry);
                tracing::info!(peer = %self.self_addr, member = %entry.addr(), "learned new member");
                events.append(Event {
                    observer: self.self_addr,
                    kind: EventKind::NodeAdd {
                        added: entry.addr(),
                    },
                });
            }
        }
    }
}
