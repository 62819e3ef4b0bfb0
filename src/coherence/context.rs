use super::message::{Addr, MemOp, Message, NodeId};
use crate::timeq::Latency;

/// What a protocol handler needs from the node it runs on.
///
/// The handler owns all coherence state; the context only routes messages and tracks the
/// processor's outstanding operation.
pub trait NodeContext {
    fn id(&self) -> NodeId;

    /// Home node of a line address.
    fn home_of(&self, addr: Addr) -> NodeId;

    /// Append to `dst`'s inbound queue. `dst` may be this node.
    fn send(&mut self, dst: NodeId, msg: Message);

    /// Append to this node's local cache request queue.
    fn send_cache(&mut self, msg: Message);

    fn mem_op(&self) -> Option<MemOp>;

    /// Retire the outstanding op so the processor can issue its next one.
    fn complete_op(&mut self);

    fn node_latency(&self) -> Latency;

    fn cache_latency(&self) -> Latency;
}
