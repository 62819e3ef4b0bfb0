use std::collections::VecDeque;

use serde::Serialize;

use crate::coherence::{Addr, Message, MsgKind, NodeId};
use crate::timeq::Cycle;

/// Queues every message delivered to a node's protocol engine, and provides a consume()
/// interface to dequeue them in delivery order.
#[derive(Debug, Default)]
pub struct Tracer {
    enabled: bool,
    buf: VecDeque<Line>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Line {
    pub cycle: Cycle,
    pub kind: MsgKind,
    pub src: NodeId,
    pub addr: Addr,
}

impl Tracer {
    pub fn new(enabled: bool) -> Tracer {
        Tracer {
            enabled,
            buf: VecDeque::new(),
        }
    }

    pub fn record(&mut self, cycle: Cycle, msg: &Message) {
        if !self.enabled {
            return;
        }
        self.buf.push_back(Line {
            cycle,
            kind: msg.kind,
            src: msg.src,
            addr: msg.addr,
        });
    }

    pub fn consume(&mut self) -> Option<Line> {
        self.buf.pop_front()
    }

    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.buf.iter()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
