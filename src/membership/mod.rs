// Gossip membership and failure detection.
//
// Every peer keeps an ordered list of the members it knows about, each with
// the highest heartbeat it has seen for that member and the local tick at
// which that heartbeat last advanced. Entries that go quiet become suspected
// after `t_fail` ticks and are evicted after `t_remove`; suspected ids are
// withheld from outgoing gossip and ignored in incoming gossip.

use crate::common::{Address, Tick};
use serde::{Deserialize, Serialize};

pub mod detector;

pub use detector::FailureDetector;

/// One row of the membership list.
///
/// `heartbeat` is monotonically non-decreasing; `last_seen` is the local tick
/// at which the heartbeat last advanced or the entry was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub id: u32,
    pub port: u16,
    pub heartbeat: i64,
    pub last_seen: Tick,
}

impl MemberEntry {
    pub fn addr(&self) -> Address {
        Address::new(self.id, self.port)
    }
}

/// Failure-detector tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    /// Ticks of silence before a member becomes suspected.
    pub t_fail: Tick,

    /// Ticks of silence before a member is evicted from the list.
    pub t_remove: Tick,

    /// Gossip targets drawn per tick.
    pub fanout: usize,

    /// Well-known peer new members introduce themselves to.
    pub introducer: Address,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            t_fail: 5,
            t_remove: 20,
            fanout: 5,
            introducer: Address::new(1, 0),
        }
    }
}
