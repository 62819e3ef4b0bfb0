use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::base::behavior::*;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::base::port::{InputPort, Port};
use crate::coherence::{Addr, MemOp, Message, MsiHandler, NodeContext, NodeId, ProtocolError};
use crate::sim::cache::LocalCache;
use crate::sim::config::{EvictSpec, SimConfig};
use crate::sim::interleave::HomeMap;
use crate::sim::trace::Tracer;
use crate::timeq::{Cycle, Latency};

/// What the protocol engine sees of its node: the network, the local cache's request queue and
/// the processor's single outstanding op.
pub struct NodeCtx {
    id: NodeId,
    homes: HomeMap,
    peers: Arc<[Port<Message>]>,
    cache_out: Vec<Message>,
    op: Option<MemOp>,
    completed: u64,
    node_latency: Latency,
    cache_latency: Latency,
}

impl NodeCtx {
    fn new(id: NodeId, config: &SimConfig, peers: Arc<[Port<Message>]>) -> Self {
        Self {
            id,
            homes: HomeMap::new(config.line_bytes, config.num_nodes),
            peers,
            cache_out: Vec::new(),
            op: None,
            completed: 0,
            node_latency: config.node_latency,
            cache_latency: config.cache_latency,
        }
    }

    /// Make `op` the outstanding op. Only one may be in flight per node.
    pub fn start_op(&mut self, op: MemOp) -> Result<(), ProtocolError> {
        if let Some(outstanding) = self.op {
            return Err(ProtocolError::OpOutstanding {
                node: self.id,
                op,
                outstanding,
            });
        }
        self.op = Some(op);
        Ok(())
    }
}

impl NodeContext for NodeCtx {
    fn id(&self) -> NodeId {
        self.id
    }

    fn home_of(&self, addr: Addr) -> NodeId {
        self.homes.home_of(addr)
    }

    fn send(&mut self, dst: NodeId, msg: Message) {
        match self.peers.get(dst) {
            Some(port) => {
                if !port.put(msg) {
                    warn!("node {}: node {} is gone, message dropped", self.id, dst);
                }
            }
            None => warn!("node {}: no node {}, dropped {}", self.id, dst, msg),
        }
    }

    fn send_cache(&mut self, msg: Message) {
        self.cache_out.push(msg);
    }

    fn mem_op(&self) -> Option<MemOp> {
        self.op
    }

    fn complete_op(&mut self) {
        if let Some(op) = self.op.take() {
            info!(
                "node {}: {} {:#x} done",
                self.id,
                if op.write { "write" } else { "read" },
                op.addr
            );
            self.completed += 1;
        }
    }

    fn node_latency(&self) -> Latency {
        self.node_latency
    }

    fn cache_latency(&self) -> Latency {
        self.cache_latency
    }
}

/// One processor node: a program of memory ops, a local cache and the protocol engine that keeps
/// the cache coherent with its peers.
pub struct Node {
    base: ModuleBase<SimConfig>,
    pub id: NodeId,
    handler: MsiHandler,
    ctx: NodeCtx,
    cache: LocalCache,
    inbox: InputPort<Message>,
    program: VecDeque<MemOp>,
    evictions: VecDeque<EvictSpec>,
    tracer: Tracer,
}

module!(Node, SimConfig);

impl Node {
    pub fn new(
        id: NodeId,
        config: Arc<SimConfig>,
        peers: Arc<[Port<Message>]>,
        inbox: InputPort<Message>,
    ) -> Self {
        Self {
            ctx: NodeCtx::new(id, &config, peers),
            cache: LocalCache::new(id),
            tracer: Tracer::new(config.trace),
            base: ModuleBase::new(config),
            id,
            handler: MsiHandler::new(),
            inbox,
            program: VecDeque::new(),
            evictions: VecDeque::new(),
        }
    }

    pub fn push_op(&mut self, op: MemOp) {
        let addr = self.ctx.homes.line_addr(op.addr);
        self.program.push_back(MemOp { addr, ..op });
    }

    pub fn schedule_eviction(&mut self, evict: EvictSpec) {
        let evict = EvictSpec {
            addr: self.ctx.homes.line_addr(evict.addr),
            ..evict
        };
        let at = self.evictions.partition_point(|e| e.cycle <= evict.cycle);
        self.evictions.insert(at, evict);
    }

    /// Move everything peers have sent so far into the protocol engine. Called for every node
    /// before any node ticks, so a message is never seen in the cycle it was sent.
    pub fn latch(&mut self) {
        let mut arrived = self.inbox.drain();
        // Producers race when ticked in parallel. Stable sort restores sequential order while
        // keeping each sender's own order.
        arrived.sort_by_key(|msg| msg.src);
        for msg in arrived {
            self.handler.enqueue(msg);
        }
    }

    pub fn handler(&self) -> &MsiHandler {
        &self.handler
    }

    pub fn tracer(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    pub fn outstanding(&self) -> Option<MemOp> {
        self.ctx.op
    }

    pub fn completed_ops(&self) -> u64 {
        self.ctx.completed
    }

    pub fn remaining_ops(&self) -> usize {
        self.program.len() + usize::from(self.ctx.op.is_some())
    }

    /// Program retired and nothing left in flight on this node.
    pub fn is_finished(&self) -> bool {
        self.remaining_ops() == 0
            && self.evictions.is_empty()
            && self.inbox.queued() == 0
            && self.cache.pending() == 0
            && self.ctx.cache_out.is_empty()
            && self.handler.is_quiescent()
    }

    fn flush_cache_requests(&mut self) {
        for msg in self.ctx.cache_out.drain(..) {
            self.cache.request(msg);
        }
    }

    fn issue_next(&mut self) -> Result<(), ProtocolError> {
        if self.ctx.op.is_some() {
            return Ok(());
        }
        let Some(op) = self.program.pop_front() else {
            return Ok(());
        };
        self.ctx.start_op(op)?;
        self.handler.issue(&mut self.ctx);
        Ok(())
    }

    fn fire_evictions(&mut self, now: Cycle) {
        while self.evictions.front().is_some_and(|e| e.cycle <= now) {
            if let Some(evict) = self.evictions.pop_front() {
                self.cache.evict(evict.addr);
            }
        }
    }
}

impl ModuleBehaviors for Node {
    type Error = ProtocolError;

    fn tick_one(&mut self) -> Result<(), ProtocolError> {
        let now = self.now();
        for reply in self.cache.tick() {
            self.handler.enqueue(reply);
        }
        for msg in self.handler.take_deliverable() {
            self.tracer.record(now, &msg);
            self.handler.deliver(&mut self.ctx, msg)?;
        }
        self.issue_next()?;
        self.flush_cache_requests();
        self.fire_evictions(now);
        self.base.cycle += 1;
        Ok(())
    }

    fn reset(&mut self) {
        debug!("node {}: reset", self.id);
        self.base.cycle = 0;
        self.handler.reset();
        self.cache.reset();
        self.tracer.clear();
        self.inbox.drain();
        let ctx = NodeCtx::new(self.id, self.conf(), Arc::clone(&self.ctx.peers));
        self.ctx = ctx;
        self.program.clear();
        self.evictions.clear();
    }
}
