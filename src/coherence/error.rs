use thiserror::Error;

use super::directory::DirectoryEntry;
use super::line::LineStatus;
use super::message::{Addr, MemOp, MsgKind, NodeId};

/// Impossible protocol states. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("node {node}: INVALIDATE_ACK from node {src} for {addr:#x} with no pending invalidation")]
    UnexpectedAck { node: NodeId, src: NodeId, addr: Addr },

    #[error("node {node}: {kind} from node {src} for {addr:#x} but local line is {state:?}, not MODIFIED")]
    NotOwner {
        node: NodeId,
        src: NodeId,
        addr: Addr,
        kind: MsgKind,
        state: Option<LineStatus>,
    },

    #[error("node {node}: {kind} from node {src} for {addr:#x} does not match outstanding op {op:?}")]
    UnexpectedReply {
        node: NodeId,
        src: NodeId,
        addr: Addr,
        kind: MsgKind,
        op: Option<MemOp>,
    },

    #[error("node {node}: DATA_WRITE_BACK from node {src} for {addr:#x}, directory entry is {entry:?}")]
    UnexpectedWriteBack {
        node: NodeId,
        src: NodeId,
        addr: Addr,
        entry: DirectoryEntry,
    },

    #[error("node {node}: {kind} for {addr:#x} completed a transaction but the blocked head is {head:?}")]
    MissingTransaction {
        node: NodeId,
        addr: Addr,
        kind: MsgKind,
        head: Option<MsgKind>,
    },

    #[error("node {node}: local cache answered {kind} for {addr:#x}, expected {expected:?}")]
    UnexpectedCacheReply {
        node: NodeId,
        addr: Addr,
        kind: MsgKind,
        expected: Option<MsgKind>,
    },

    #[error("node {node}: op {op:?} issued while {outstanding:?} is outstanding")]
    OpOutstanding {
        node: NodeId,
        op: MemOp,
        outstanding: MemOp,
    },
}

impl ProtocolError {
    pub fn node(&self) -> NodeId {
        match self {
            Self::UnexpectedAck { node, .. }
            | Self::NotOwner { node, .. }
            | Self::UnexpectedReply { node, .. }
            | Self::UnexpectedWriteBack { node, .. }
            | Self::MissingTransaction { node, .. }
            | Self::UnexpectedCacheReply { node, .. }
            | Self::OpOutstanding { node, .. } => *node,
        }
    }

    /// The remote endpoint involved, if the error was raised by a message from a peer.
    pub fn peer(&self) -> Option<NodeId> {
        match self {
            Self::UnexpectedAck { src, .. }
            | Self::NotOwner { src, .. }
            | Self::UnexpectedReply { src, .. }
            | Self::UnexpectedWriteBack { src, .. } => Some(*src),
            _ => None,
        }
    }

    pub fn addr(&self) -> Addr {
        match self {
            Self::UnexpectedAck { addr, .. }
            | Self::NotOwner { addr, .. }
            | Self::UnexpectedReply { addr, .. }
            | Self::UnexpectedWriteBack { addr, .. }
            | Self::MissingTransaction { addr, .. }
            | Self::UnexpectedCacheReply { addr, .. } => *addr,
            Self::OpOutstanding { op, .. } => op.addr,
        }
    }
}
