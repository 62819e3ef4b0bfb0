use log::{debug, warn};

use crate::coherence::{Addr, Message, MsgKind, NodeId};
use crate::timeq::DelayQueue;

/// Timing-only model of a node's local cache. Requests are answered in arrival order once their
/// latency runs out; no data is stored and there is no replacement policy, evictions are injected
/// from outside.
#[derive(Debug)]
pub struct LocalCache {
    id: NodeId,
    requests: DelayQueue<Message>,
    alerts: Vec<Addr>,
}

impl LocalCache {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            requests: DelayQueue::new(),
            alerts: Vec::new(),
        }
    }

    pub fn request(&mut self, msg: Message) {
        if !msg.kind.is_cache_request() {
            warn!("cache {}: ignoring non-cache message {}", self.id, msg);
            return;
        }
        self.requests.push(msg);
    }

    /// Drop a line and tell the protocol about it.
    pub fn evict(&mut self, addr: Addr) {
        debug!("cache {}: evict {:#x}", self.id, addr);
        self.alerts.push(addr);
    }

    pub fn pending(&self) -> usize {
        self.requests.len() + self.alerts.len()
    }

    /// Advance one cycle and return the replies that became ready, eviction alerts first.
    pub fn tick(&mut self) -> Vec<Message> {
        let id = self.id;
        let mut out: Vec<Message> = self
            .alerts
            .drain(..)
            .map(|addr| Message::new(id, addr, MsgKind::CacheEvictionAlert, 0))
            .collect();
        self.requests.age_all();
        out.extend(self.requests.take_ready().into_iter().filter_map(|req| {
            let reply = req.kind.cache_reply()?;
            Some(Message::new(id, req.addr, reply, 0))
        }));
        out
    }

    pub fn reset(&mut self) {
        self.requests.clear();
        self.alerts.clear();
    }
}
