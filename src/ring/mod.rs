// Consistent-hash ring.
//
// Maps addresses and keys onto a circular [0, RING_SIZE) space with FNV-1a.
// The ring is rebuilt from the live peer set each tick; a change in the
// ordered node sequence signals the stabilizer.

use crate::common::Address;

/// Size of the hash circle. A power of two shared by every peer.
pub const RING_SIZE: u64 = 1 << 32;

/// FNV-1a hash (fast, good distribution).
fn fnv1a(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;

    let mut hash = FNV_OFFSET;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Ring position of a raw key string.
pub fn key_position(key: &str) -> u64 {
    fnv1a(key.as_bytes()) % RING_SIZE
}

/// Ring position of a peer, hashed over its canonical `"id:port"` form.
pub fn addr_position(addr: Address) -> u64 {
    fnv1a(addr.to_string().as_bytes()) % RING_SIZE
}

/// A peer placed on the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingNode {
    pub addr: Address,
    pub hash: u64,
}

/// The ordered ring: nodes ascending by hash, ties broken by address bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashRing {
    nodes: Vec<RingNode>,
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the live peer set. Returns true when the ordered node
    /// sequence differs from the previous build.
    pub fn rebuild(&mut self, peers: &[Address]) -> bool {
        let mut nodes: Vec<RingNode> = peers
            .iter()
            .map(|&addr| RingNode {
                addr,
                hash: addr_position(addr),
            })
            .collect();
        nodes.sort_by(|a, b| a.hash.cmp(&b.hash).then_with(|| a.addr.cmp(&b.addr)));

        if nodes == self.nodes {
            return false;
        }
        self.nodes = nodes;
        true
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[RingNode] {
        &self.nodes
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.nodes.iter().any(|n| n.addr == addr)
    }

    /// The replica triple for a key: the first three ring successors of the
    /// key position, in (Primary, Secondary, Tertiary) order. Empty when
    /// fewer than three peers are live; no operation can proceed then.
    pub fn replicas_for(&self, key: &str) -> Vec<RingNode> {
        if self.nodes.len() < 3 {
            return Vec::new();
        }
        let pos = key_position(key);
        let start = self.nodes.partition_point(|n| n.hash < pos) % self.nodes.len();
        (0..3)
            .map(|offset| self.nodes[(start + offset) % self.nodes.len()])
            .collect()
    }

    /// Up to `count` distinct ring successors of `addr`, clockwise. Empty if
    /// the address is not on the ring.
    pub fn successors_of(&self, addr: Address, count: usize) -> Vec<Address> {
        self.neighbors_of(addr, count, 1)
    }

    /// Up to `count` distinct ring predecessors of `addr`, counter-clockwise.
    pub fn predecessors_of(&self, addr: Address, count: usize) -> Vec<Address> {
        self.neighbors_of(addr, count, -1)
    }

    fn neighbors_of(&self, addr: Address, count: usize, step: isize) -> Vec<Address> {
        let Some(index) = self.nodes.iter().position(|n| n.addr == addr) else {
            return Vec::new();
        };
        let n = self.nodes.len() as isize;
        let count = count.min(self.nodes.len().saturating_sub(1));
        (1..=count as isize)
            .map(|offset| {
                let i = (index as isize + step * offset).rem_euclid(n);
                self.nodes[i as usize].addr
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_of(ids: &[u32]) -> HashRing {
        let peers: Vec<Address> = ids.iter().map(|&id| Address::new(id, 0)).collect();
        let mut ring = HashRing::new();
        ring.rebuild(&peers);
        ring
    }

    #[test]
    fn test_rebuild_reports_change() {
        let mut ring = HashRing::new();
        assert!(ring.rebuild(&[Address::new(1, 0), Address::new(2, 0)]));
        // Same set, different input order: same ordered ring, no change.
        assert!(!ring.rebuild(&[Address::new(2, 0), Address::new(1, 0)]));
        assert!(ring.rebuild(&[Address::new(1, 0)]));
    }

    #[test]
    fn test_ring_is_sorted_by_hash() {
        let ring = ring_of(&[1, 2, 3, 4, 5, 6, 7]);
        let hashes: Vec<u64> = ring.nodes().iter().map(|n| n.hash).collect();
        let mut sorted = hashes.clone();
        sorted.sort();
        assert_eq!(hashes, sorted);
    }

    #[test]
    fn test_positions_are_deterministic_and_bounded() {
        assert_eq!(key_position("alpha"), key_position("alpha"));
        assert_ne!(key_position("alpha"), key_position("beta"));
        assert!(addr_position(Address::new(9, 42)) < RING_SIZE);
    }

    #[test]
    fn test_under_three_peers_yields_no_replicas() {
        assert!(ring_of(&[1]).replicas_for("k").is_empty());
        assert!(ring_of(&[1, 2]).replicas_for("k").is_empty());
        assert_eq!(ring_of(&[1, 2, 3]).replicas_for("k").len(), 3);
    }

    #[test]
    fn test_replicas_are_consecutive_successors() {
        let ring = ring_of(&[1, 2, 3, 4, 5]);
        let triple = ring.replicas_for("some-key");
        assert_eq!(triple.len(), 3);

        let start = ring
            .nodes()
            .iter()
            .position(|n| n.addr == triple[0].addr)
            .unwrap();
        for (offset, node) in triple.iter().enumerate() {
            assert_eq!(
                ring.nodes()[(start + offset) % ring.len()].addr,
                node.addr
            );
        }
        // Primary is the first node at or past the key position (with wrap).
        let pos = key_position("some-key");
        for node in ring.nodes() {
            if node.hash >= pos {
                assert_eq!(node.addr, triple[0].addr);
                break;
            }
        }
    }

    #[test]
    fn test_wraparound_past_highest_hash() {
        let ring = ring_of(&[1, 2, 3, 4]);
        // Probe many keys; any key hashing past the last node must wrap to
        // the ring head.
        let top = ring.nodes().last().unwrap().hash;
        let head = ring.nodes()[0].addr;
        let mut wrapped = false;
        for i in 0..200 {
            let key = format!("probe-{i}");
            if key_position(&key) > top {
                assert_eq!(ring.replicas_for(&key)[0].addr, head);
                wrapped = true;
            }
        }
        assert!(wrapped, "no probe key wrapped; widen the probe range");
    }

    #[test]
    fn test_successors_and_predecessors() {
        let ring = ring_of(&[1, 2, 3, 4, 5]);
        let anchor = ring.nodes()[0].addr;
        let succ = ring.successors_of(anchor, 2);
        assert_eq!(succ, vec![ring.nodes()[1].addr, ring.nodes()[2].addr]);

        let pred = ring.predecessors_of(anchor, 2);
        assert_eq!(
            pred,
            vec![ring.nodes()[4].addr, ring.nodes()[3].addr]
        );

        assert!(ring.successors_of(Address::new(99, 0), 2).is_empty());
    }

    #[test]
    fn test_neighbor_count_capped_by_ring() {
        let ring = ring_of(&[1, 2]);
        let anchor = ring.nodes()[0].addr;
        assert_eq!(ring.successors_of(anchor, 2).len(), 1);
    }
}
