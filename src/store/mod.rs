// Per-replica local store.
//
// A plain map from key to record, exclusively owned by its peer. Each record
// remembers which replica role this peer currently plays for the key; the
// stabilizer re-types records in place when the ring moves.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which of the three replicas of a key this peer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaRole {
    Primary,
    Secondary,
    Tertiary,
}

impl ReplicaRole {
    /// Role for position `index` in a replica triple.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(ReplicaRole::Primary),
            1 => Some(ReplicaRole::Secondary),
            2 => Some(ReplicaRole::Tertiary),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ReplicaRole::Primary => 0,
            ReplicaRole::Secondary => 1,
            ReplicaRole::Tertiary => 2,
        }
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::from_index(byte as usize)
    }
}

/// A stored value plus the role this peer plays for its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub value: String,
    pub role: ReplicaRole,
}

/// In-memory key-value store backing one replica.
#[derive(Debug, Default)]
pub struct KvStore {
    records: HashMap<String, StoredRecord>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record. Fails (returns false) when the key is present.
    pub fn create(&mut self, key: &str, value: String, role: ReplicaRole) -> bool {
        if self.records.contains_key(key) {
            return false;
        }
        self.records
            .insert(key.to_string(), StoredRecord { value, role });
        true
    }

    pub fn read(&self, key: &str) -> Option<&StoredRecord> {
        self.records.get(key)
    }

    /// Overwrite an existing record. Fails when the key is absent.
    pub fn update(&mut self, key: &str, value: String, role: ReplicaRole) -> bool {
        match self.records.get_mut(key) {
            Some(record) => {
                record.value = value;
                record.role = role;
                true
            }
            None => false,
        }
    }

    /// Remove a key, reporting whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.records.remove(key).is_some()
    }

    /// Remove a key and hand back its record (stabilization handoff).
    pub fn take(&mut self, key: &str) -> Option<StoredRecord> {
        self.records.remove(key)
    }

    /// Re-type a record in place, leaving the value untouched.
    pub fn set_role(&mut self, key: &str, role: ReplicaRole) {
        if let Some(record) = self.records.get_mut(key) {
            record.role = role;
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Owned snapshot of the keys, for sweeps that mutate while iterating.
    pub fn keys(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StoredRecord)> {
        self.records.iter()
    }
}
