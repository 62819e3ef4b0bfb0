
use crate::coherence::context::NodeContext;
use crate::coherence::message::{Addr, MemOp, Message, MsgKind, NodeId};
use crate::timeq::Latency;

/// Context stub that records everything the handler emits. Home of `addr` is `addr % num_nodes`.
pub(super) struct RecordingContext {
    pub id: NodeId,
    pub num_nodes: usize,
    pub sent: Vec<(NodeId, Message)>,
    pub cache: Vec<Message>,
    pub op: Option<MemOp>,
    pub completed: usize,
}

impl RecordingContext {
    pub fn new(id: NodeId, num_nodes: usize) -> Self {
        Self {
            id,
            num_nodes,
            sent: Vec::new(),
            cache: Vec::new(),
            op: None,
            completed: 0,
        }
    }

    pub fn take_sent(&mut self) -> Vec<(NodeId, MsgKind)> {
        self.sent.drain(..).map(|(dst, msg)| (dst, msg.kind)).collect()
    }

    pub fn take_cache(&mut self) -> Vec<MsgKind> {
        self.cache.drain(..).map(|msg| msg.kind).collect()
    }
}

impl NodeContext for RecordingContext {
    fn id(&self) -> NodeId {
        self.id
    }

    fn home_of(&self, addr: Addr) -> NodeId {
        (addr as usize) % self.num_nodes
    }

    fn send(&mut self, dst: NodeId, msg: Message) {
        self.sent.push((dst, msg));
    }

    fn send_cache(&mut self, msg: Message) {
        self.cache.push(msg);
    }

    fn mem_op(&self) -> Option<MemOp> {
        self.op
    }

    fn complete_op(&mut self) {
        self.op = None;
        self.completed += 1;
    }

    fn node_latency(&self) -> Latency {
        2
    }

    fn cache_latency(&self) -> Latency {
        1
    }
}

pub(super) fn msg(src: NodeId, addr: Addr, kind: MsgKind) -> Message {
    Message::new(src, addr, kind, 0)
}
