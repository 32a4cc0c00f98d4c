// Transport and time seams.
//
// The peer core never touches sockets or wall clocks directly: it is handed a
// `Network` (fire-and-forget byte pipe) and a `Clock` (monotone tick source)
// at construction. The in-process `MemoryNetwork` binding lives in
// `net::memory`; the wire layout in `net::codec`.

pub mod codec;
pub mod memory;

pub use codec::{Message, Payload};
pub use memory::MemoryNetwork;

use crate::common::{Address, Tick};
use bytes::Bytes;
use std::sync::atomic::{AtomicI64, Ordering};

/// Datagram transport between peers.
///
/// Sends are fire-and-forget: the network may drop or reorder. Receipt
/// delivers whatever is pending for `addr` in arrival order; the caller owns
/// the inbound FIFO from there.
pub trait Network: Send + Sync {
    fn send(&self, from: Address, to: Address, payload: Bytes);
    fn recv(&self, addr: Address) -> Vec<Bytes>;
}

/// Monotone logical time source. The only clock the membership detector and
/// the coordinator timeout ever consult.
pub trait Clock: Send + Sync {
    fn now(&self) -> Tick;
}

/// Shared tick counter advanced by the simulation driver.
#[derive(Debug, Default)]
pub struct SimClock {
    tick: AtomicI64,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance logical time by one tick and return the new value.
    pub fn advance(&self) -> Tick {
        self.tick.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn set(&self, tick: Tick) {
        self.tick.store(tick, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Tick {
        self.tick.load(Ordering::SeqCst)
    }
}
