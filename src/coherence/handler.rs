use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, warn};
use smallvec::SmallVec;

use super::blocked::{AckOutcome, BlockedQueues, Grant, PendingAcks};
use super::context::NodeContext;
use super::directory::{Directory, DirectoryEntry};
use super::error::ProtocolError;
use super::line::{LineStatus, LineStates};
use super::message::{Addr, Message, MsgKind, NodeId};
use crate::timeq::DelayQueue;

/// What to do once the local cache answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheWait {
    /// Local hit; retire the processor's op.
    CompleteOp,
    /// Forwarded request; return the line to its home.
    WriteBack,
    /// Sharer invalidation; acknowledge to the home and release the parked INVALIDATE.
    AckInvalidate(NodeId),
    Discard,
}

#[derive(Debug, Clone, Copy)]
struct ExpectedReply {
    reply: MsgKind,
    wait: CacheWait,
}

fn send<C: NodeContext>(ctx: &mut C, dst: NodeId, addr: Addr, kind: MsgKind) {
    let msg = Message::new(ctx.id(), addr, kind, ctx.node_latency());
    debug!("node {}: send {} to node {} @ {:#x}", ctx.id(), kind, dst, addr);
    ctx.send(dst, msg);
}

/// Directory-based MSI state machine for one node.
///
/// The handler owns everything the protocol mutates on its node: local line states, the directory
/// slice for lines homed here, pending invalidation acks, per-address blocked queues and the
/// inbound queue. Peers are only reached through [`NodeContext::send`].
#[derive(Debug, Default)]
pub struct MsiHandler {
    lines: LineStates,
    directory: Directory,
    pending_acks: PendingAcks,
    blocked: BlockedQueues,
    inbound: DelayQueue<Message>,
    cache_waits: HashMap<Addr, VecDeque<ExpectedReply>>,
    // lines written back on eviction whose forwarded request may still be in flight
    evicted: HashSet<Addr>,
}

impl MsiHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, msg: Message) {
        self.inbound.push(msg);
    }

    pub fn line_state(&self, addr: Addr) -> Option<LineStatus> {
        self.lines.get(addr)
    }

    pub fn lines(&self) -> &LineStates {
        &self.lines
    }

    pub fn directory_entry(&self, addr: Addr) -> DirectoryEntry {
        self.directory.lookup(addr)
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn pending_acks(&self, addr: Addr) -> Option<usize> {
        self.pending_acks.get(addr).map(|pending| pending.remaining)
    }

    pub fn blocked(&self) -> &BlockedQueues {
        &self.blocked
    }

    /// No message queued, parked or awaiting a cache answer.
    pub fn is_quiescent(&self) -> bool {
        self.inbound.is_empty()
            && self.blocked.total() == 0
            && self.pending_acks.len() == 0
            && self.cache_waits.is_empty()
    }

    pub fn reset(&mut self) {
        self.lines.clear();
        self.directory.clear();
        self.pending_acks.clear();
        self.blocked.clear();
        self.inbound.clear();
        self.cache_waits.clear();
        self.evicted.clear();
    }

    /// Start the processor's outstanding op, if any.
    pub fn issue<C: NodeContext>(&mut self, ctx: &mut C) {
        let Some(op) = ctx.mem_op() else {
            return;
        };
        let addr = op.addr;
        let home = ctx.home_of(addr);
        debug!(
            "node {}: issue {} @ {:#x}, line {:?}",
            ctx.id(),
            if op.write { "write" } else { "read" },
            addr,
            self.lines.get(addr)
        );
        match (self.lines.get(addr), op.write) {
            (None, false) => send(ctx, home, addr, MsgKind::ReadMiss),
            (None, true) => send(ctx, home, addr, MsgKind::WriteMiss),
            (Some(_), false) => {
                self.request_cache(ctx, addr, MsgKind::CacheRead, CacheWait::CompleteOp)
            }
            (Some(LineStatus::Shared), true) => send(ctx, home, addr, MsgKind::Invalidate),
            (Some(LineStatus::Modified), true) => {
                self.request_cache(ctx, addr, MsgKind::CacheUpdate, CacheWait::CompleteOp)
            }
        }
    }

    /// Age the inbound and blocked queues and take every message whose latency has run out, in
    /// arrival order.
    pub fn take_deliverable(&mut self) -> Vec<Message> {
        self.inbound.age_all();
        self.blocked.age_all();
        self.inbound.take_ready()
    }

    /// Deliver one message; a message that cannot complete yet is parked behind its address.
    pub fn deliver<C: NodeContext>(&mut self, ctx: &mut C, msg: Message) -> Result<(), ProtocolError> {
        if !self.handle(ctx, &msg)? {
            debug!("node {}: park {}", ctx.id(), msg);
            self.blocked.push_back(msg);
        }
        Ok(())
    }

    /// One protocol step.
    pub fn step<C: NodeContext>(&mut self, ctx: &mut C) -> Result<(), ProtocolError> {
        for msg in self.take_deliverable() {
            self.deliver(ctx, msg)?;
        }
        Ok(())
    }

    /// Dispatch one message. `Ok(false)` means the message could not complete and belongs at the
    /// back of its address's blocked queue.
    pub fn handle<C: NodeContext>(&mut self, ctx: &mut C, msg: &Message) -> Result<bool, ProtocolError> {
        if msg.kind.is_busy_gated() && self.blocked.is_busy(msg.addr) {
            debug!("node {}: {} blocked behind {} message(s)", ctx.id(), msg, self.blocked.len(msg.addr));
            return Ok(false);
        }
        self.service(ctx, msg)
    }

    // Dispatch without the busy gate. Used directly when draining a blocked queue, where the
    // message being serviced is itself the next transaction for its address.
    fn service<C: NodeContext>(&mut self, ctx: &mut C, msg: &Message) -> Result<bool, ProtocolError> {
        debug!("node {}: handle {}", ctx.id(), msg);
        match msg.kind {
            MsgKind::ReadMiss => self.read_miss(ctx, msg),
            MsgKind::WriteMiss => self.write_miss(ctx, msg.addr, msg.src),
            MsgKind::Invalidate => self.invalidate(ctx, msg),
            MsgKind::InvalidateAck => self.invalidate_ack(ctx, msg),
            MsgKind::Fetch => self.forward(ctx, msg, false),
            MsgKind::FetchInvalidate => self.forward(ctx, msg, true),
            MsgKind::DataValueReply => self.data_value_reply(ctx, msg),
            MsgKind::DataWriteBack => self.write_back(ctx, msg),
            MsgKind::CacheReadReply | MsgKind::CacheUpdateAck | MsgKind::CacheInvalidateAck => {
                self.cache_reply(ctx, msg)
            }
            MsgKind::CacheEvictionAlert => {
                self.eviction(ctx, msg.addr);
                Ok(true)
            }
            MsgKind::CacheRead | MsgKind::CacheUpdate | MsgKind::CacheInvalidate | MsgKind::CacheFetch => {
                warn!("node {}: dropping {}, not a protocol message", ctx.id(), msg);
                Ok(true)
            }
        }
    }

    fn read_miss<C: NodeContext>(&mut self, ctx: &mut C, msg: &Message) -> Result<bool, ProtocolError> {
        let addr = msg.addr;
        let entry = self.directory.entry_mut(addr);
        match entry.owner() {
            None => {
                entry.add_sharer(msg.src);
                self.reply_data(ctx, addr, msg.src)?;
                Ok(true)
            }
            Some(owner) => {
                send(ctx, owner, addr, MsgKind::Fetch);
                Ok(false)
            }
        }
    }

    fn write_miss<C: NodeContext>(&mut self, ctx: &mut C, addr: Addr, requester: NodeId) -> Result<bool, ProtocolError> {
        match self.directory.lookup(addr) {
            DirectoryEntry::Uncached => {
                self.directory.entry_mut(addr).set_owner(requester);
                self.reply_data(ctx, addr, requester)?;
                Ok(true)
            }
            DirectoryEntry::Shared(sharers) => {
                self.fan_out(ctx, addr, requester, sharers.into_iter(), Grant::Data)
            }
            DirectoryEntry::Modified(owner) => {
                send(ctx, owner, addr, MsgKind::FetchInvalidate);
                Ok(false)
            }
        }
    }

    // Grant the line's data to `requester`. A miss from the home itself is filled on the spot.
    fn reply_data<C: NodeContext>(&mut self, ctx: &mut C, addr: Addr, requester: NodeId) -> Result<(), ProtocolError> {
        if requester == ctx.id() {
            return self.fill(ctx, addr, requester, MsgKind::DataValueReply);
        }
        send(ctx, requester, addr, MsgKind::DataValueReply);
        Ok(())
    }

    fn invalidate<C: NodeContext>(&mut self, ctx: &mut C, msg: &Message) -> Result<bool, ProtocolError> {
        let addr = msg.addr;
        if ctx.home_of(addr) == ctx.id() {
            // upgrade request from a sharer
            return match self.directory.lookup(addr) {
                DirectoryEntry::Shared(sharers) if sharers.contains(&msg.src) => {
                    self.fan_out(ctx, addr, msg.src, sharers.into_iter(), Grant::Upgrade)
                }
                // the requester's copy was invalidated while the upgrade was in flight
                _ => self.write_miss(ctx, addr, msg.src),
            };
        }
        match self.lines.invalidate(addr) {
            None => {
                send(ctx, msg.src, addr, MsgKind::InvalidateAck);
                Ok(true)
            }
            Some(_) => {
                self.request_cache(ctx, addr, MsgKind::CacheInvalidate, CacheWait::AckInvalidate(msg.src));
                Ok(false)
            }
        }
    }

    // Invalidate every sharer except the originator. The home's own copy is dropped in place.
    fn fan_out<C: NodeContext>(
        &mut self,
        ctx: &mut C,
        addr: Addr,
        originator: NodeId,
        sharers: impl Iterator<Item = NodeId>,
        grant: Grant,
    ) -> Result<bool, ProtocolError> {
        let me = ctx.id();
        let mut targets: SmallVec<[NodeId; 4]> = SmallVec::new();
        for sharer in sharers.filter(|&sharer| sharer != originator) {
            if sharer == me {
                if self.lines.invalidate(addr).is_some() {
                    self.request_cache(ctx, addr, MsgKind::CacheInvalidate, CacheWait::Discard);
                }
            } else {
                targets.push(sharer);
            }
        }
        if targets.is_empty() {
            self.grant_exclusive(ctx, addr, originator, grant)?;
            return Ok(true);
        }
        for &target in &targets {
            send(ctx, target, addr, MsgKind::Invalidate);
        }
        debug!("node {}: waiting on {} ack(s) @ {:#x}", me, targets.len(), addr);
        self.pending_acks.start(addr, targets.len(), grant);
        Ok(false)
    }

    fn grant_exclusive<C: NodeContext>(
        &mut self,
        ctx: &mut C,
        addr: Addr,
        originator: NodeId,
        grant: Grant,
    ) -> Result<(), ProtocolError> {
        self.directory.entry_mut(addr).set_owner(originator);
        match grant {
            Grant::Data => return self.reply_data(ctx, addr, originator),
            Grant::Upgrade if originator == ctx.id() => self.upgrade_local(ctx, addr),
            Grant::Upgrade => send(ctx, originator, addr, MsgKind::InvalidateAck),
        }
        Ok(())
    }

    fn upgrade_local<C: NodeContext>(&mut self, ctx: &mut C, addr: Addr) {
        self.lines.set(addr, LineStatus::Modified);
        self.request_cache(ctx, addr, MsgKind::CacheUpdate, CacheWait::Discard);
        ctx.complete_op();
    }

    fn invalidate_ack<C: NodeContext>(&mut self, ctx: &mut C, msg: &Message) -> Result<bool, ProtocolError> {
        let addr = msg.addr;
        let me = ctx.id();
        if ctx.home_of(addr) != me {
            // final ack for our own upgrade
            match ctx.mem_op() {
                Some(op) if op.write && op.addr == addr => {}
                op => {
                    return Err(ProtocolError::UnexpectedReply {
                        node: me,
                        src: msg.src,
                        addr,
                        kind: msg.kind,
                        op,
                    })
                }
            }
            self.upgrade_local(ctx, addr);
            return Ok(true);
        }

        match self.pending_acks.ack(addr) {
            None => Err(ProtocolError::UnexpectedAck {
                node: me,
                src: msg.src,
                addr,
            }),
            Some(AckOutcome::Waiting(remaining)) => {
                debug!("node {}: {} ack(s) left @ {:#x}", me, remaining, addr);
                Ok(true)
            }
            Some(AckOutcome::Complete(grant)) => {
                let originator = match self.blocked.head(addr) {
                    Some(head) if matches!(head.kind, MsgKind::WriteMiss | MsgKind::Invalidate) => head.src,
                    head => {
                        return Err(ProtocolError::MissingTransaction {
                            node: me,
                            addr,
                            kind: msg.kind,
                            head: head.map(|head| head.kind),
                        })
                    }
                };
                self.grant_exclusive(ctx, addr, originator, grant)?;
                self.release(ctx, addr)?;
                Ok(true)
            }
        }
    }

    fn forward<C: NodeContext>(&mut self, ctx: &mut C, msg: &Message, invalidate: bool) -> Result<bool, ProtocolError> {
        let addr = msg.addr;
        match self.lines.get(addr) {
            Some(LineStatus::Modified) => {}
            None if self.evicted.remove(&addr) => {
                debug!("node {}: {} raced an eviction write-back, dropping", ctx.id(), msg);
                return Ok(true);
            }
            state => {
                return Err(ProtocolError::NotOwner {
                    node: ctx.id(),
                    src: msg.src,
                    addr,
                    kind: msg.kind,
                    state,
                })
            }
        }
        if invalidate {
            self.lines.invalidate(addr);
            self.request_cache(ctx, addr, MsgKind::CacheInvalidate, CacheWait::WriteBack);
        } else {
            self.lines.set(addr, LineStatus::Shared);
            self.request_cache(ctx, addr, MsgKind::CacheFetch, CacheWait::WriteBack);
        }
        Ok(true)
    }

    fn data_value_reply<C: NodeContext>(&mut self, ctx: &mut C, msg: &Message) -> Result<bool, ProtocolError> {
        self.fill(ctx, msg.addr, msg.src, msg.kind)?;
        Ok(true)
    }

    /// Install the line the outstanding op missed on and retire the op.
    fn fill<C: NodeContext>(
        &mut self,
        ctx: &mut C,
        addr: Addr,
        src: NodeId,
        kind: MsgKind,
    ) -> Result<(), ProtocolError> {
        let op = match ctx.mem_op() {
            Some(op) if op.addr == addr => op,
            op => {
                return Err(ProtocolError::UnexpectedReply {
                    node: ctx.id(),
                    src,
                    addr,
                    kind,
                    op,
                })
            }
        };
        let status = if op.write {
            LineStatus::Modified
        } else {
            LineStatus::Shared
        };
        self.lines.set(addr, status);
        self.evicted.remove(&addr);
        self.request_cache(ctx, addr, MsgKind::CacheUpdate, CacheWait::Discard);
        ctx.complete_op();
        Ok(())
    }

    fn write_back<C: NodeContext>(&mut self, ctx: &mut C, msg: &Message) -> Result<bool, ProtocolError> {
        let addr = msg.addr;
        let me = ctx.id();
        let entry = self.directory.lookup(addr);
        if entry.owner() != Some(msg.src) || self.pending_acks.contains(addr) {
            return Err(ProtocolError::UnexpectedWriteBack {
                node: me,
                src: msg.src,
                addr,
                entry,
            });
        }

        let Some((requester, head_kind)) = self.blocked.head(addr).map(|head| (head.src, head.kind)) else {
            // eviction
            self.directory.entry_mut(addr).clear();
            return Ok(true);
        };
        match head_kind {
            MsgKind::ReadMiss => self.directory.entry_mut(addr).add_sharer(requester),
            MsgKind::WriteMiss | MsgKind::Invalidate => self.directory.entry_mut(addr).set_owner(requester),
            other => {
                return Err(ProtocolError::MissingTransaction {
                    node: me,
                    addr,
                    kind: msg.kind,
                    head: Some(other),
                })
            }
        }
        self.reply_data(ctx, addr, requester)?;
        self.release(ctx, addr)?;
        Ok(true)
    }

    fn cache_reply<C: NodeContext>(&mut self, ctx: &mut C, msg: &Message) -> Result<bool, ProtocolError> {
        let addr = msg.addr;
        let expected = self.cache_waits.get_mut(&addr).and_then(VecDeque::pop_front);
        if self.cache_waits.get(&addr).is_some_and(VecDeque::is_empty) {
            self.cache_waits.remove(&addr);
        }
        let wait = match expected {
            Some(expected) if expected.reply == msg.kind => expected.wait,
            expected => {
                return Err(ProtocolError::UnexpectedCacheReply {
                    node: ctx.id(),
                    addr,
                    kind: msg.kind,
                    expected: expected.map(|expected| expected.reply),
                })
            }
        };
        match wait {
            CacheWait::CompleteOp => ctx.complete_op(),
            CacheWait::WriteBack => {
                let home = ctx.home_of(addr);
                send(ctx, home, addr, MsgKind::DataWriteBack);
            }
            CacheWait::AckInvalidate(home) => {
                send(ctx, home, addr, MsgKind::InvalidateAck);
                self.release(ctx, addr)?;
            }
            CacheWait::Discard => {}
        }
        Ok(true)
    }

    fn eviction<C: NodeContext>(&mut self, ctx: &mut C, addr: Addr) {
        match self.lines.invalidate(addr) {
            Some(LineStatus::Modified) => {
                self.evicted.insert(addr);
                let home = ctx.home_of(addr);
                send(ctx, home, addr, MsgKind::DataWriteBack);
            }
            Some(LineStatus::Shared) => {
                debug!("node {}: silently dropped shared line {:#x}", ctx.id(), addr);
            }
            None => {}
        }
    }

    fn request_cache<C: NodeContext>(&mut self, ctx: &mut C, addr: Addr, kind: MsgKind, wait: CacheWait) {
        let Some(reply) = kind.cache_reply() else {
            warn!("node {}: {} is not a cache request", ctx.id(), kind);
            return;
        };
        ctx.send_cache(Message::new(ctx.id(), addr, kind, ctx.cache_latency()));
        self.cache_waits.entry(addr).or_default().push_back(ExpectedReply { reply, wait });
    }

    // The head of `addr`'s blocked queue has completed: drop it and service what queued up behind
    // it until one message has to wait again.
    fn release<C: NodeContext>(&mut self, ctx: &mut C, addr: Addr) -> Result<(), ProtocolError> {
        self.blocked.pop_front(addr);
        while let Some(next) = self.blocked.pop_front(addr) {
            if !self.service(ctx, &next)? {
                debug!("node {}: {} stays at the head", ctx.id(), next);
                self.blocked.push_front(next);
                break;
            }
        }
        Ok(())
    }
}
