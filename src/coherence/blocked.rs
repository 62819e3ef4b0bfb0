use std::collections::{HashMap, VecDeque};

use super::message::{Addr, Message};
use crate::timeq::Delayed;

/// Per-address FIFO of messages parked while their line has a transaction in flight. The head of
/// a queue is the message whose transaction is in progress.
#[derive(Debug, Default)]
pub struct BlockedQueues {
    queues: HashMap<Addr, VecDeque<Message>>,
}

impl BlockedQueues {
    pub fn is_busy(&self, addr: Addr) -> bool {
        self.queues.contains_key(&addr)
    }

    pub fn push_back(&mut self, msg: Message) {
        self.queues.entry(msg.addr).or_default().push_back(msg);
    }

    pub fn push_front(&mut self, msg: Message) {
        self.queues.entry(msg.addr).or_default().push_front(msg);
    }

    pub fn head(&self, addr: Addr) -> Option<&Message> {
        self.queues.get(&addr).and_then(VecDeque::front)
    }

    /// Pop the head; an emptied queue is removed so the address reads as idle.
    pub fn pop_front(&mut self, addr: Addr) -> Option<Message> {
        let queue = self.queues.get_mut(&addr)?;
        let msg = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(&addr);
        }
        msg
    }

    pub fn len(&self, addr: Addr) -> usize {
        self.queues.get(&addr).map_or(0, VecDeque::len)
    }

    pub fn total(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn age_all(&mut self) {
        self.queues
            .values_mut()
            .flat_map(|queue| queue.iter_mut())
            .for_each(Delayed::age);
    }

    pub fn iter(&self, addr: Addr) -> impl Iterator<Item = &Message> {
        self.queues.get(&addr).into_iter().flatten()
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }
}

/// What the home grants the fan-out originator once every sharer has acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    /// The originator still holds a shared copy; an INVALIDATE_ACK is enough.
    Upgrade,
    /// The originator has no copy and needs the data.
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAck {
    pub remaining: usize,
    pub grant: Grant,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AckOutcome {
    Waiting(usize),
    Complete(Grant),
}

/// Outstanding INVALIDATE_ACK counts for fan-outs started by this home node.
#[derive(Debug, Default)]
pub struct PendingAcks {
    entries: HashMap<Addr, PendingAck>,
}

impl PendingAcks {
    pub fn start(&mut self, addr: Addr, count: usize, grant: Grant) {
        assert!(count > 0, "a fan-out with no targets completes immediately");
        let previous = self.entries.insert(
            addr,
            PendingAck {
                remaining: count,
                grant,
            },
        );
        assert!(previous.is_none(), "overlapping fan-outs for {:#x}", addr);
    }

    pub fn get(&self, addr: Addr) -> Option<PendingAck> {
        self.entries.get(&addr).copied()
    }

    pub fn contains(&self, addr: Addr) -> bool {
        self.entries.contains_key(&addr)
    }

    /// Count one ack. `None` if no fan-out is pending for the address.
    pub fn ack(&mut self, addr: Addr) -> Option<AckOutcome> {
        let entry = self.entries.get_mut(&addr)?;
        entry.remaining -= 1;
        if entry.remaining > 0 {
            return Some(AckOutcome::Waiting(entry.remaining));
        }
        let grant = entry.grant;
        self.entries.remove(&addr);
        Some(AckOutcome::Complete(grant))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
