// Shared cluster harness for integration tests.
//
// Spins up N peers (ids 1..=N, peer 1 the introducer) on one in-memory
// network with a shared clock and event log, and drives them in lockstep.

use quorum_kv::event::{Event, MemoryEventLog};
use quorum_kv::net::{MemoryNetwork, SimClock};
use quorum_kv::{Address, Peer, PeerConfig};
use std::sync::Arc;

pub struct SimCluster {
    pub network: Arc<MemoryNetwork>,
    pub clock: Arc<SimClock>,
    pub log: Arc<MemoryEventLog>,
    pub peers: Vec<Peer>,
}

#[allow(dead_code)] // not every test file uses every helper
impl SimCluster {
    pub fn new(count: u32) -> Self {
        let network = Arc::new(MemoryNetwork::new());
        let clock = Arc::new(SimClock::new());
        let log = Arc::new(MemoryEventLog::new());
        let peers = (1..=count)
            .map(|id| {
                Peer::new(
                    Self::addr(id),
                    PeerConfig::default(),
                    network.clone(),
                    clock.clone(),
                    log.clone(),
                )
                .expect("valid peer address")
            })
            .collect();
        Self {
            network,
            clock,
            log,
            peers,
        }
    }

    pub fn addr(id: u32) -> Address {
        Address::new(id, 0)
    }

    /// Advance the shared clock one tick and run every live peer once.
    pub fn tick(&mut self) {
        self.clock.advance();
        for peer in self.peers.iter_mut() {
            peer.tick();
        }
    }

    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    pub fn peer(&self, id: u32) -> &Peer {
        self.peers
            .iter()
            .find(|p| p.addr() == Self::addr(id))
            .expect("peer exists")
    }

    pub fn peer_mut(&mut self, id: u32) -> &mut Peer {
        self.peers
            .iter_mut()
            .find(|p| p.addr() == Self::addr(id))
            .expect("peer exists")
    }

    /// Crash a peer: it stops ticking and the network drops its traffic.
    pub fn crash(&mut self, id: u32) {
        self.network.crash(Self::addr(id));
        self.peer_mut(id).crash();
    }

    pub fn live_ids(&self) -> Vec<u32> {
        self.peers
            .iter()
            .filter(|p| !p.is_failed())
            .map(|p| p.addr().id)
            .collect()
    }

    /// The live peer set a given peer believes in, as sorted ids.
    pub fn view_of(&self, id: u32) -> Vec<u32> {
        let mut ids: Vec<u32> = self.peer(id).live_peers().iter().map(|a| a.id).collect();
        ids.sort();
        ids
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.events()
    }
}
