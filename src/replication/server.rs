// Replica-side CRUD.
//
// Applies operations received from remote coordinators to the local store,
// records the outcome as a server-side event, and builds the typed reply.
// Dispatch is strictly one handler per message type.

use crate::common::Address;
use crate::event::{Event, EventKind, EventLog};
use crate::net::codec::{Message, Payload};
use crate::store::{KvStore, ReplicaRole};

/// Stateless handler for inbound replica traffic on one peer.
pub struct ReplicaServer {
    self_addr: Address,
}

impl ReplicaServer {
    pub fn new(self_addr: Address) -> Self {
        Self { self_addr }
    }

    /// Apply a KV request to the store. Returns the reply to send back to
    /// the coordinator, or None for non-request messages.
    pub fn handle(
        &self,
        store: &mut KvStore,
        events: &dyn EventLog,
        msg: &Message,
    ) -> Option<Message> {
        match &msg.payload {
            Payload::KvCreate { key, value, replica } => Some(self.apply_create(
                store,
                events,
                msg.trans_id,
                key,
                value.clone(),
                *replica,
            )),
            Payload::KvRead { key } => Some(self.apply_read(store, events, msg.trans_id, key)),
            Payload::KvUpdate { key, value, replica } => Some(self.apply_update(
                store,
                events,
                msg.trans_id,
                key,
                value.clone(),
                *replica,
            )),
            Payload::KvDelete { key } => Some(self.apply_delete(store, events, msg.trans_id, key)),
            _ => None,
        }
    }

    fn apply_create(
        &self,
        store: &mut KvStore,
        events: &dyn EventLog,
        trans_id: u32,
        key: &str,
        value: String,
        replica: ReplicaRole,
    ) -> Message {
        let success = store.create(key, value.clone(), replica);
        let kind = if success {
            EventKind::CreateSuccess {
                coordinator: false,
                trans_id,
                key: key.to_string(),
                value,
            }
        } else {
            EventKind::CreateFail {
                coordinator: false,
                trans_id,
                key: key.to_string(),
                value,
            }
        };
        events.append(Event {
            observer: self.self_addr,
            kind,
        });
        self.reply(trans_id, success)
    }

    fn apply_read(
        &self,
        store: &mut KvStore,
        events: &dyn EventLog,
        trans_id: u32,
        key: &str,
    ) -> Message {
        let value = store.read(key).map(|record| record.value.clone());
        let kind = match &value {
            Some(value) => EventKind::ReadSuccess {
                coordinator: false,
                trans_id,
                key: key.to_string(),
                value: value.clone(),
            },
            None => EventKind::ReadFail {
                coordinator: false,
                trans_id,
                key: key.to_string(),
            },
        };
        events.append(Event {
            observer: self.self_addr,
            kind,
        });
        Message::new(
            trans_id,
            self.self_addr,
            Payload::KvReadReply {
                success: value.is_some(),
                value: value.unwrap_or_default(),
            },
        )
    }

    fn apply_update(
        &self,
        store: &mut KvStore,
        events: &dyn EventLog,
        trans_id: u32,
        key: &str,
        value: String,
        replica: ReplicaRole,
    ) -> Message {
        let success = store.update(key, value.clone(), replica);
        let kind = if success {
            EventKind::UpdateSuccess {
                coordinator: false,
                trans_id,
                key: key.to_string(),
                value,
            }
        } else {
            EventKind::UpdateFail {
                coordinator: false,
                trans_id,
                key: key.to_string(),
                value,
            }
        };
        events.append(Event {
            observer: self.self_addr,
            kind,
        });
        self.reply(trans_id, success)
    }

    fn apply_delete(
        &self,
        store: &mut KvStore,
        events: &dyn EventLog,
        trans_id: u32,
        key: &str,
    ) -> Message {
        let success = store.delete(key);
        let kind = if success {
            EventKind::DeleteSuccess {
                coordinator: false,
                trans_id,
                key: key.to_string(),
            }
        } else {
            EventKind::DeleteFail {
                coordinator: false,
                trans_id,
                key: key.to_string(),
            }
        };
        events.append(Event {
            observer: self.self_addr,
            kind,
        });
        self.reply(trans_id, success)
    }

    fn reply(&self, trans_id: u32, success: bool) -> Message {
        Message::new(trans_id, self.self_addr, Payload::KvReply { success })
    }
}
