// Wire codec.
//
// Every frame starts with a fixed header (message type byte, u32 transaction
// id, 6-byte sender address) followed by a type-specific body. Integers are
// little-endian; strings are u32-length-prefixed UTF-8; membership lists are
// a u32 count followed by fixed-width entries. The layout must be identical
// on every peer of a cluster.

use crate::common::Address;
use crate::error::{KvError, Result};
use crate::membership::MemberEntry;
use crate::store::ReplicaRole;
use bytes::{Buf, BufMut, Bytes, BytesMut};

const MSG_JOIN_REQ: u8 = 0;
const MSG_JOIN_REP: u8 = 1;
const MSG_GOSSIP: u8 = 2;
const MSG_KV_CREATE: u8 = 3;
const MSG_KV_READ: u8 = 4;
const MSG_KV_UPDATE: u8 = 5;
const MSG_KV_DELETE: u8 = 6;
const MSG_KV_REPLY: u8 = 7;
const MSG_KV_READ_REPLY: u8 = 8;

/// Bytes per serialized membership entry: id + port + heartbeat + last_seen.
const MEMBER_ENTRY_LEN: usize = 4 + 2 + 8 + 8;

/// A decoded frame: common header plus typed body.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub trans_id: u32,
    pub from: Address,
    pub payload: Payload,
}

/// Type-specific message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    JoinReq { addr: Address, heartbeat: i64 },
    JoinRep { members: Vec<MemberEntry> },
    Gossip { members: Vec<MemberEntry> },
    KvCreate { key: String, value: String, replica: ReplicaRole },
    KvRead { key: String },
    KvUpdate { key: String, value: String, replica: ReplicaRole },
    KvDelete { key: String },
    KvReply { success: bool },
    KvReadReply { success: bool, value: String },
}

impl Message {
    pub fn new(trans_id: u32, from: Address, payload: Payload) -> Self {
        Self {
            trans_id,
            from,
            payload,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(self.payload.msg_type());
        buf.put_u32_le(self.trans_id);
        buf.put_slice(&self.from.to_bytes());

        match &self.payload {
            Payload::JoinReq { addr, heartbeat } => {
                buf.put_slice(&addr.to_bytes());
                buf.put_i64_le(*heartbeat);
            }
            Payload::JoinRep { members } | Payload::Gossip { members } => {
                buf.put_u32_le(members.len() as u32);
                for entry in members {
                    buf.put_u32_le(entry.id);
                    buf.put_u16_le(entry.port);
                    buf.put_i64_le(entry.heartbeat);
                    buf.put_i64_le(entry.last_seen);
                }
            }
            Payload::KvCreate { key, value, replica }
            | Payload::KvUpdate { key, value, replica } => {
                put_string(&mut buf, key);
                put_string(&mut buf, value);
                buf.put_u8(replica.as_u8());
            }
            Payload::KvRead { key } | Payload::KvDelete { key } => {
                put_string(&mut buf, key);
            }
            Payload::KvReply { success } => {
                buf.put_u8(*success as u8);
            }
            Payload::KvReadReply { success, value } => {
                buf.put_u8(*success as u8);
                put_string(&mut buf, value);
            }
        }
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let msg_type = get_u8(&mut buf)?;
        let trans_id = get_u32(&mut buf)?;
        let from = get_addr(&mut buf)?;

        let payload = match msg_type {
            MSG_JOIN_REQ => {
                let addr = get_addr(&mut buf)?;
                let heartbeat = get_i64(&mut buf)?;
                Payload::JoinReq { addr, heartbeat }
            }
            MSG_JOIN_REP => Payload::JoinRep {
                members: get_members(&mut buf)?,
            },
            MSG_GOSSIP => Payload::Gossip {
                members: get_members(&mut buf)?,
            },
            MSG_KV_CREATE | MSG_KV_UPDATE => {
                let key = get_string(&mut buf)?;
                let value = get_string(&mut buf)?;
                let replica = get_role(&mut buf)?;
                if msg_type == MSG_KV_CREATE {
                    Payload::KvCreate { key, value, replica }
                } else {
                    Payload::KvUpdate { key, value, replica }
                }
            }
            MSG_KV_READ => Payload::KvRead {
                key: get_string(&mut buf)?,
            },
            MSG_KV_DELETE => Payload::KvDelete {
                key: get_string(&mut buf)?,
            },
            MSG_KV_REPLY => Payload::KvReply {
                success: get_u8(&mut buf)? != 0,
            },
            MSG_KV_READ_REPLY => {
                let success = get_u8(&mut buf)? != 0;
                let value = get_string(&mut buf)?;
                Payload::KvReadReply { success, value }
            }
            other => return Err(KvError::UnknownMessage(other)),
        };

        Ok(Message {
            trans_id,
            from,
            payload,
        })
    }
}

impl Payload {
    fn msg_type(&self) -> u8 {
        match self {
            Payload::JoinReq { .. } => MSG_JOIN_REQ,
            Payload::JoinRep { .. } => MSG_JOIN_REP,
            Payload::Gossip { .. } => MSG_GOSSIP,
            Payload::KvCreate { .. } => MSG_KV_CREATE,
            Payload::KvRead { .. } => MSG_KV_READ,
            Payload::KvUpdate { .. } => MSG_KV_UPDATE,
            Payload::KvDelete { .. } => MSG_KV_DELETE,
            Payload::KvReply { .. } => MSG_KV_REPLY,
            Payload::KvReadReply { .. } => MSG_KV_READ_REPLY,
        }
    }
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn need(buf: &[u8], n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(KvError::Codec(format!(
            "truncated frame: need {} bytes, have {}",
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut &[u8]) -> Result<u16> {
    need(buf, 2)?;
    Ok(buf.get_u16_le())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32_le())
}

fn get_i64(buf: &mut &[u8]) -> Result<i64> {
    need(buf, 8)?;
    Ok(buf.get_i64_le())
}

fn get_addr(buf: &mut &[u8]) -> Result<Address> {
    need(buf, Address::LEN)?;
    let mut raw = [0u8; Address::LEN];
    buf.copy_to_slice(&mut raw);
    Address::from_bytes(&raw)
}

fn get_string(buf: &mut &[u8]) -> Result<String> {
    let len = get_u32(buf)? as usize;
    need(buf, len)?;
    let raw = buf[..len].to_vec();
    buf.advance(len);
    String::from_utf8(raw).map_err(|e| KvError::Codec(format!("invalid UTF-8 string: {e}")))
}

fn get_role(buf: &mut &[u8]) -> Result<ReplicaRole> {
    let byte = get_u8(buf)?;
    ReplicaRole::from_u8(byte).ok_or_else(|| KvError::Codec(format!("invalid replica role {byte}")))
}

fn get_members(buf: &mut &[u8]) -> Result<Vec<MemberEntry>> {
    let count = get_u32(buf)? as usize;
    // A count the frame cannot possibly carry is a malformed header.
    need(buf, count.saturating_mul(MEMBER_ENTRY_LEN))?;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        members.push(MemberEntry {
            id: get_u32(buf)?,
            port: get_u16(buf)?,
            heartbeat: get_i64(buf)?,
            last_seen: get_i64(buf)?,
        });
    }
    Ok(members)
}
