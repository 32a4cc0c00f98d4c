// Client-side coordinator.
//
// Owns the per-peer transaction id counter and the in-flight transaction
// map. Each client call dispatches one typed message per replica; replies
// are tallied by transaction id until quorum resolves the outcome or the
// timeout sweep gives up. A transaction resolves exactly once; anything
// arriving later is dropped.

use crate::common::{Address, Tick};
use crate::event::{Event, EventKind, EventLog};
use crate::net::codec::{Message, Payload};
use crate::replication::{
    CrudOp, COORDINATOR_TIMEOUT, READ_QUORUM, REPAIR_ID_BASE, REPLICATION_FACTOR, WRITE_QUORUM,
};
use crate::ring::RingNode;
use crate::store::ReplicaRole;
use std::collections::HashMap;

/// Coordinator-side state for one in-flight client operation.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub trans_id: u32,
    pub op: CrudOp,
    pub key: String,
    pub value: Option<String>,
    pub started: Tick,
    pub replies_success: Vec<Address>,
    pub replies_failure: Vec<Address>,
    pub read_values: Vec<String>,
}

impl Transaction {
    fn replies(&self) -> usize {
        self.replies_success.len() + self.replies_failure.len()
    }

    fn has_replied(&self, from: Address) -> bool {
        self.replies_success.contains(&from) || self.replies_failure.contains(&from)
    }

    /// The value ≥ READ_QUORUM replicas agree on, if any. On disagreement the
    /// majority value wins; without a majority there is nothing to return.
    fn agreed_value(&self) -> Option<&String> {
        self.read_values.iter().find(|candidate| {
            self.read_values
                .iter()
                .filter(|v| v == candidate)
                .count()
                >= READ_QUORUM
        })
    }
}

/// Drives client CRUD against the replica triple of each key.
pub struct Coordinator {
    self_addr: Address,
    next_id: u32,
    inflight: HashMap<u32, Transaction>,
    timeout: Tick,
}

impl Coordinator {
    pub fn new(self_addr: Address) -> Self {
        Self {
            self_addr,
            next_id: 1,
            inflight: HashMap::new(),
            timeout: COORDINATOR_TIMEOUT,
        }
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Open a transaction and build the per-replica messages. With no
    /// replicas available nothing is sent and the transaction dies by
    /// timeout, surfacing the single failure event.
    pub fn begin(
        &mut self,
        op: CrudOp,
        key: String,
        value: Option<String>,
        replicas: &[RingNode],
        now: Tick,
    ) -> (u32, Vec<(Address, Message)>) {
        let trans_id = self.next_id;
        // Client ids stay below the reserved repair range.
        self.next_id = if self.next_id + 1 >= REPAIR_ID_BASE {
            1
        } else {
            self.next_id + 1
        };

        let transaction = Transaction {
            trans_id,
            op,
            key: key.clone(),
            value: value.clone(),
            started: now,
            replies_success: Vec::new(),
            replies_failure: Vec::new(),
            read_values: Vec::new(),
        };
        self.inflight.insert(trans_id, transaction);

        let mut sends = Vec::with_capacity(replicas.len());
        for (index, node) in replicas.iter().take(REPLICATION_FACTOR).enumerate() {
            let role = ReplicaRole::from_index(index).unwrap_or(ReplicaRole::Tertiary);
            let payload = match op {
                CrudOp::Create => Payload::KvCreate {
                    key: key.clone(),
                    value: value.clone().unwrap_or_default(),
                    replica: role,
                },
                CrudOp::Update => Payload::KvUpdate {
                    key: key.clone(),
                    value: value.clone().unwrap_or_default(),
                    replica: role,
                },
                CrudOp::Read => Payload::KvRead { key: key.clone() },
                CrudOp::Delete => Payload::KvDelete { key: key.clone() },
            };
            sends.push((node.addr, Message::new(trans_id, self.self_addr, payload)));
        }

        tracing::debug!(
            peer = %self.self_addr,
            trans_id,
            op = ?op,
            replicas = sends.len(),
            "transaction opened"
        );
        (trans_id, sends)
    }

    /// Tally a write acknowledgement. Replies for unknown or already
    /// resolved transactions are dropped, as are duplicate replies from one
    /// replica.
    pub fn handle_reply(
        &mut self,
        trans_id: u32,
        from: Address,
        success: bool,
        events: &dyn EventLog,
    ) {
        let Some(transaction) = self.inflight.get_mut(&trans_id) else {
            return;
        };
        if transaction.has_replied(from) || transaction.replies() >= REPLICATION_FACTOR {
            return;
        }
        if success {
            transaction.replies_success.push(from);
        } else {
            transaction.replies_failure.push(from);
        }
        self.try_resolve(trans_id, events);
    }

    /// Tally a read reply, keeping the returned value for agreement checks.
    pub fn handle_read_reply(
        &mut self,
        trans_id: u32,
        from: Address,
        success: bool,
        value: String,
        events: &dyn EventLog,
    ) {
        let Some(transaction) = self.inflight.get_mut(&trans_id) else {
            return;
        };
        if transaction.has_replied(from) || transaction.replies() >= REPLICATION_FACTOR {
            return;
        }
        if success {
            transaction.replies_success.push(from);
            transaction.read_values.push(value);
        } else {
            transaction.replies_failure.push(from);
        }
        self.try_resolve(trans_id, events);
    }

    /// Give up on transactions older than the timeout. Runs once per tick.
    pub fn sweep(&mut self, now: Tick, events: &dyn EventLog) {
        let expired: Vec<u32> = self
            .inflight
            .values()
            .filter(|t| now - t.started > self.timeout)
            .map(|t| t.trans_id)
            .collect();
        for trans_id in expired {
            let transaction = self.inflight.remove(&trans_id).expect("expired id present");
            tracing::warn!(
                peer = %self.self_addr,
                trans_id,
                op = ?transaction.op,
                "transaction timed out"
            );
            self.emit(&transaction, false, None, events);
        }
    }

    /// Check quorum after a reply landed; emit the single outcome event once
    /// the transaction is decided and drop its record.
    fn try_resolve(&mut self, trans_id: u32, events: &dyn EventLog) {
        let Some(transaction) = self.inflight.get(&trans_id) else {
            return;
        };

        let outcome = match transaction.op {
            CrudOp::Create | CrudOp::Update | CrudOp::Delete => {
                if transaction.replies_success.len() >= WRITE_QUORUM {
                    Some((true, None))
                } else if transaction.replies_failure.len() >= WRITE_QUORUM {
                    Some((false, None))
                } else {
                    None
                }
            }
            CrudOp::Read => {
                if let Some(value) = transaction.agreed_value() {
                    Some((true, Some(value.clone())))
                } else if transaction.replies_failure.len() >= READ_QUORUM
                    || transaction.replies() >= REPLICATION_FACTOR
                {
                    // Two misses, or all replies in without agreement.
                    Some((false, None))
                } else {
                    None
                }
            }
        };

        if let Some((success, read_value)) = outcome {
            let transaction = self.inflight.remove(&trans_id).expect("resolved id present");
            self.emit(&transaction, success, read_value, events);
        }
    }

    fn emit(
        &self,
        transaction: &Transaction,
        success: bool,
        read_value: Option<String>,
        events: &dyn EventLog,
    ) {
        let trans_id = transaction.trans_id;
        let key = transaction.key.clone();
        let value = transaction.value.clone().unwrap_or_default();
        let kind = match (transaction.op, success) {
            (CrudOp::Create, true) => EventKind::CreateSuccess {
                coordinator: true,
                trans_id,
                key,
                value,
            },
            (CrudOp::Create, false) => EventKind::CreateFail {
                coordinator: true,
                trans_id,
                key,
                value,
            },
            (CrudOp::Update, true) => EventKind::UpdateSuccess {
                coordinator: true,
                trans_id,
                key,
                value,
            },
            (CrudOp::Update, false) => EventKind::UpdateFail {
                coordinator: true,
                trans_id,
                key,
                value,
            },
            (CrudOp::Delete, true) => EventKind::DeleteSuccess {
                coordinator: true,
                trans_id,
                key,
            },
            (CrudOp::Delete, false) => EventKind::DeleteFail {
                coordinator: true,
                trans_id,
                key,
            },
            (CrudOp::Read, true) => EventKind::ReadSuccess {
                coordinator: true,
                trans_id,
                key,
                value: read_value.unwrap_or_default(),
            },
            (CrudOp::Read, false) => EventKind::ReadFail {
                coordinator: true,
                trans_id,
                key,
            },
        };
        events.append(Event {
            observer: self.self_addr,
            kind,
        });
    }
}
