// Peer composition root.
//
// One `Peer` owns the full per-process state: failure detector, ring, local
// store, coordinator, replica server and stabilizer, plus the injected
// network, clock and event log. The external driver calls `tick()` once per
// logical time step; everything runs to completion inside the call.

use crate::common::{Address, Tick};
use crate::error::{KvError, Result};
use crate::event::EventLog;
use crate::membership::{FailureDetector, MemberEntry, MembershipConfig};
use crate::net::codec::{Message, Payload};
use crate::net::{Clock, Network};
use crate::replication::{Coordinator, CrudOp, ReplicaServer, Stabilizer};
use crate::ring::HashRing;
use crate::store::KvStore;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;

/// Per-peer configuration.
#[derive(Debug, Clone, Default)]
pub struct PeerConfig {
    pub membership: MembershipConfig,

    /// Seed for the gossip target RNG; keyed off the address by default so
    /// simulations are reproducible.
    pub gossip_seed: Option<u64>,
}

/// A single cluster participant.
pub struct Peer {
    addr: Address,
    detector: FailureDetector,
    ring: HashRing,
    store: KvStore,
    coordinator: Coordinator,
    server: ReplicaServer,
    stabilizer: Stabilizer,

    network: Arc<dyn Network>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventLog>,

    inbound: VecDeque<Bytes>,
    started: bool,
    failed: bool,
}

impl Peer {
    pub fn new(
        addr: Address,
        config: PeerConfig,
        network: Arc<dyn Network>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventLog>,
    ) -> Result<Self> {
        if addr.is_null() {
            return Err(KvError::Configuration(
                "peer address must not be the null address".to_string(),
            ));
        }
        if addr.id == config.membership.introducer.id && addr != config.membership.introducer {
            return Err(KvError::Configuration(format!(
                "address {addr} collides with the introducer id"
            )));
        }

        let now = clock.now();
        let seed = config.gossip_seed.unwrap_or(u64::from(addr.id) << 16 | u64::from(addr.port));
        let detector = FailureDetector::new(addr, config.membership, seed, now);

        Ok(Self {
            addr,
            detector,
            ring: HashRing::new(),
            store: KvStore::new(),
            coordinator: Coordinator::new(addr),
            server: ReplicaServer::new(addr),
            stabilizer: Stabilizer::new(addr),
            network,
            clock,
            events,
            inbound: VecDeque::new(),
            started: false,
            failed: false,
        })
    }

    pub fn addr(&self) -> Address {
        self.addr
    }

    pub fn in_group(&self) -> bool {
        self.detector.in_group()
    }

    /// Live peer set as this peer sees it (self first, insertion order).
    pub fn live_peers(&self) -> Vec<Address> {
        self.detector.live_peers()
    }

    /// Remote membership entries (tests and diagnostics).
    pub fn members(&self) -> &[MemberEntry] {
        self.detector.members()
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    /// Simulated crash: the peer stops participating entirely.
    pub fn crash(&mut self) {
        self.failed = true;
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// One protocol period. Membership duties first, then ring maintenance
    /// and stabilization, then the inbound drain, then coordinator timeouts.
    pub fn tick(&mut self) {
        if self.failed {
            return;
        }
        let now = self.clock.now();

        if !self.started {
            self.started = true;
            if let Some((to, msg)) = self.detector.join_request() {
                self.send(to, msg);
            }
        }

        if self.detector.in_group() {
            for (to, msg) in self.detector.tick(now, self.events.as_ref()) {
                self.send(to, msg);
            }

            let peers = self.detector.live_peers();
            if self.ring.rebuild(&peers) {
                for (to, msg) in self.stabilizer.stabilize(&self.ring, &mut self.store) {
                    self.send(to, msg);
                }
            }
        }

        for raw in self.network.recv(self.addr) {
            self.inbound.push_back(raw);
        }
        while let Some(raw) = self.inbound.pop_front() {
            match Message::decode(&raw) {
                Ok(msg) => self.dispatch(msg, now),
                // Malformed traffic is dropped; the protocol recovers by
                // retransmission or timeout.
                Err(err) => {
                    tracing::debug!(peer = %self.addr, %err, "dropping undecodable frame");
                }
            }
        }

        self.coordinator.sweep(now, self.events.as_ref());
    }

    /// Client API: replicate a new record. Returns the transaction id whose
    /// outcome appears in the event log.
    pub fn create(&mut self, key: &str, value: &str) -> u32 {
        self.client_op(CrudOp::Create, key, Some(value))
    }

    /// Client API: quorum read.
    pub fn read(&mut self, key: &str) -> u32 {
        self.client_op(CrudOp::Read, key, None)
    }

    /// Client API: overwrite an existing record.
    pub fn update(&mut self, key: &str, value: &str) -> u32 {
        self.client_op(CrudOp::Update, key, Some(value))
    }

    /// Client API: remove a record.
    pub fn delete(&mut self, key: &str) -> u32 {
        self.client_op(CrudOp::Delete, key, None)
    }

    fn client_op(&mut self, op: CrudOp, key: &str, value: Option<&str>) -> u32 {
        let now = self.clock.now();
        let replicas = self.ring.replicas_for(key);
        let (trans_id, sends) = self.coordinator.begin(
            op,
            key.to_string(),
            value.map(str::to_string),
            &replicas,
            now,
        );
        for (to, msg) in sends {
            self.send(to, msg);
        }
        trans_id
    }

    fn dispatch(&mut self, msg: Message, now: Tick) {
        match msg.payload {
            Payload::JoinReq { addr, heartbeat } => {
                let (to, reply) =
                    self.detector
                        .handle_join_req(addr, heartbeat, now, self.events.as_ref());
                self.send(to, reply);
            }
            Payload::JoinRep { members } => {
                self.detector
                    .handle_join_rep(members, now, self.events.as_ref());
            }
            Payload::Gossip { members } => {
                self.detector
                    .handle_gossip(members, now, self.events.as_ref());
            }
            Payload::KvCreate { .. }
            | Payload::KvRead { .. }
            | Payload::KvUpdate { .. }
            | Payload::KvDelete { .. } => {
                if let Some(reply) =
                    self.server
                        .handle(&mut self.store, self.events.as_ref(), &msg)
                {
                    self.send(msg.from, reply);
                }
            }
            Payload::KvReply { success } => {
                // Repair replies fall through here with ids outside the
                // in-flight map and are absorbed silently.
                self.coordinator
                    .handle_reply(msg.trans_id, msg.from, success, self.events.as_ref());
            }
            Payload::KvReadReply { success, value } => {
                self.coordinator.handle_read_reply(
                    msg.trans_id,
                    msg.from,
                    success,
                    value,
                    self.events.as_ref(),
                );
            }
        }
    }

    fn send(&self, to: Address, msg: Message) {
        self.network.send(self.addr, to, msg.encode());
    }
}
