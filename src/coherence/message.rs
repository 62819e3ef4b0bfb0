use std::fmt;

use serde::Serialize;

use crate::timeq::{Delayed, Latency};

pub type NodeId = usize;
/// Cache-line address. Byte addresses are folded to line granularity before they reach the engine.
pub type Addr = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MsgKind {
    // node to node
    ReadMiss,
    WriteMiss,
    Invalidate,
    InvalidateAck,
    Fetch,
    FetchInvalidate,
    DataValueReply,
    DataWriteBack,
    // node to local cache
    CacheRead,
    CacheUpdate,
    CacheInvalidate,
    CacheFetch,
    // local cache to node
    CacheReadReply,
    CacheUpdateAck,
    CacheInvalidateAck,
    CacheEvictionAlert,
}

impl MsgKind {
    /// Requests that must wait while their address has a transaction in progress.
    pub fn is_busy_gated(self) -> bool {
        matches!(self, Self::ReadMiss | Self::WriteMiss | Self::Invalidate)
    }

    /// Requests addressed to the local cache model rather than the protocol handler.
    pub fn is_cache_request(self) -> bool {
        self.cache_reply().is_some()
    }

    /// The answer the local cache gives to this request.
    pub fn cache_reply(self) -> Option<MsgKind> {
        match self {
            Self::CacheRead | Self::CacheFetch => Some(Self::CacheReadReply),
            Self::CacheUpdate => Some(Self::CacheUpdateAck),
            Self::CacheInvalidate => Some(Self::CacheInvalidateAck),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadMiss => "READ_MISS",
            Self::WriteMiss => "WRITE_MISS",
            Self::Invalidate => "INVALIDATE",
            Self::InvalidateAck => "INVALIDATE_ACK",
            Self::Fetch => "FETCH",
            Self::FetchInvalidate => "FETCH_INVALIDATE",
            Self::DataValueReply => "DATA_VALUE_REPLY",
            Self::DataWriteBack => "DATA_WRITE_BACK",
            Self::CacheRead => "CACHE_READ",
            Self::CacheUpdate => "CACHE_UPDATE",
            Self::CacheInvalidate => "CACHE_INVALIDATE",
            Self::CacheFetch => "CACHE_FETCH",
            Self::CacheReadReply => "CACHE_READ_REPLY",
            Self::CacheUpdateAck => "CACHE_UPDATE_ACK",
            Self::CacheInvalidateAck => "CACHE_INVALIDATE_ACK",
            Self::CacheEvictionAlert => "CACHE_EVICTION_ALERT",
        }
    }
}

impl fmt::Display for MsgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The unit of protocol communication. Deliberately not `Clone`: a message is owned by exactly one
/// queue at a time and moves between them.
#[derive(Debug, PartialEq, Eq)]
pub struct Message {
    pub src: NodeId,
    pub addr: Addr,
    pub kind: MsgKind,
    latency: Latency,
}

impl Message {
    pub fn new(src: NodeId, addr: Addr, kind: MsgKind, latency: Latency) -> Self {
        Self {
            src,
            addr,
            kind,
            latency,
        }
    }
}

impl Delayed for Message {
    fn latency(&self) -> Latency {
        self.latency
    }

    fn latency_mut(&mut self) -> &mut Latency {
        &mut self.latency
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from node {} @ {:#x}", self.kind, self.src, self.addr)
    }
}

/// A processor-issued memory operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemOp {
    pub addr: Addr,
    pub write: bool,
}

impl MemOp {
    pub fn read(addr: Addr) -> Self {
        Self { addr, write: false }
    }

    pub fn write(addr: Addr) -> Self {
        Self { addr, write: true }
    }
}
