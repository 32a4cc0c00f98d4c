// Common types shared across the peer subsystems.

use crate::error::{KvError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical time unit supplied by the injected clock.
pub type Tick = i64;

/// Fixed-width peer identity: a 4-byte id followed by a 2-byte port,
/// both little-endian. Equality and ordering follow the raw byte form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub id: u32,
    pub port: u16,
}

impl Address {
    /// Wire width of an address in bytes.
    pub const LEN: usize = 6;

    pub fn new(id: u32, port: u16) -> Self {
        Self { id, port }
    }

    /// Raw 6-byte form: id (LE) then port (LE).
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..].copy_from_slice(&self.port.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::LEN {
            return Err(KvError::InvalidAddress(format!(
                "expected {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        let id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let port = u16::from_le_bytes([bytes[4], bytes[5]]);
        Ok(Self { id, port })
    }

    /// The all-zero address is reserved and never names a live peer.
    pub fn is_null(self) -> bool {
        self.id == 0 && self.port == 0
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.port)
    }
}
