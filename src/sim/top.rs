use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context};
use log::info;
use serde::Serialize;

use crate::base::behavior::*;
use crate::base::port::{link, Port};
use crate::coherence::{Addr, DirStatus, DirectoryEntry, LineStatus, Message, NodeId, ProtocolError};
use crate::sim::config::{EvictSpec, SimConfig, WorkloadConfig};
use crate::sim::interleave::HomeMap;
use crate::sim::node::Node;
use crate::timeq::Cycle;

/// All nodes of the machine, stepped in lockstep.
pub struct System {
    config: Arc<SimConfig>,
    homes: HomeMap,
    nodes: Vec<Node>,
    cycle: Cycle,
}

#[derive(Debug, Serialize)]
pub struct NodeSnapshot {
    pub lines: BTreeMap<Addr, LineStatus>,
    pub directory: BTreeMap<Addr, DirectoryEntry>,
    pub completed_ops: u64,
}

#[derive(Debug, Serialize)]
pub struct SystemSnapshot {
    pub cycle: Cycle,
    pub nodes: Vec<NodeSnapshot>,
}

impl System {
    pub fn new(config: SimConfig, workload: &WorkloadConfig, evictions: &[EvictSpec]) -> anyhow::Result<Self> {
        config.ensure_valid()?;
        workload.ensure_valid(config.num_nodes).context("invalid workload")?;
        if let Some(evict) = evictions.iter().find(|e| e.node >= config.num_nodes) {
            bail!(
                "eviction of {:#x} names node {}, but there are only {} nodes",
                evict.addr,
                evict.node,
                config.num_nodes
            );
        }
        let config = Arc::new(config);

        let (ports, inboxes): (Vec<Port<Message>>, Vec<_>) =
            (0..config.num_nodes).map(|_| link()).unzip();
        let ports: Arc<[Port<Message>]> = ports.into();
        let mut nodes: Vec<Node> = inboxes
            .into_iter()
            .enumerate()
            .map(|(id, inbox)| Node::new(id, Arc::clone(&config), Arc::clone(&ports), inbox))
            .collect();

        for op in &workload.ops {
            nodes[op.node].push_op(op.mem_op());
        }
        for evict in evictions {
            nodes[evict.node].schedule_eviction(*evict);
        }

        Ok(Self {
            homes: HomeMap::new(config.line_bytes, config.num_nodes),
            config,
            nodes,
            cycle: 0,
        })
    }

    pub fn now(&self) -> Cycle {
        self.cycle
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn home_of(&self, addr: Addr) -> NodeId {
        self.homes.home_of(addr)
    }

    pub fn line_state(&self, node: NodeId, addr: Addr) -> Option<LineStatus> {
        self.nodes[node].handler().line_state(self.homes.line_addr(addr))
    }

    /// Directory entry for `addr`, read at its home.
    pub fn directory_entry(&self, addr: Addr) -> DirectoryEntry {
        let addr = self.homes.line_addr(addr);
        self.nodes[self.home_of(addr)].handler().directory_entry(addr)
    }

    pub fn is_finished(&self) -> bool {
        self.nodes.iter().all(Node::is_finished)
    }

    /// Advance every node by one cycle. Everything sent during the previous cycle is latched first,
    /// so the outcome does not depend on the order nodes are ticked in.
    pub fn step(&mut self) -> Result<(), ProtocolError> {
        self.nodes.iter_mut().for_each(Node::latch);
        if self.config.parallel && self.nodes.len() > 1 {
            self.tick_parallel()?;
        } else {
            for node in self.nodes.iter_mut() {
                node.tick_one()?;
            }
        }
        self.cycle += 1;
        Ok(())
    }

    fn tick_parallel(&mut self) -> Result<(), ProtocolError> {
        let workers = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        let chunk = self.nodes.len().div_ceil(workers).max(1);
        let results: Vec<Result<(), ProtocolError>> = thread::scope(|s| {
            let handles: Vec<_> = self
                .nodes
                .chunks_mut(chunk)
                .map(|nodes| s.spawn(move || nodes.iter_mut().try_for_each(Node::tick_one)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });
        // chunks are in node order, so the lowest failing node wins as in sequential mode
        results.into_iter().collect()
    }

    /// Step until every node has retired its program and the network is drained.
    pub fn run(&mut self) -> anyhow::Result<Cycle> {
        while !self.is_finished() {
            if self.cycle >= self.config.timeout {
                bail!(
                    "timed out after {} cycles with {} op(s) outstanding",
                    self.cycle,
                    self.nodes.iter().map(Node::remaining_ops).sum::<usize>()
                );
            }
            if let Err(err) = self.step() {
                let context = self.describe_failure(&err);
                return Err(err).context(context);
            }
            if self.config.check_invariants {
                self.check_invariants()
                    .with_context(|| format!("after cycle {}", self.cycle))?;
            }
        }
        info!(
            "finished in {} cycles, {} op(s) completed",
            self.cycle,
            self.nodes.iter().map(Node::completed_ops).sum::<u64>()
        );
        Ok(self.cycle)
    }

    fn describe_failure(&self, err: &ProtocolError) -> String {
        let addr = err.addr();
        let home = self.home_of(addr);
        let mut text = format!(
            "cycle {}: node {} line {:?}",
            self.cycle,
            err.node(),
            self.line_state(err.node(), addr)
        );
        if let Some(peer) = err.peer() {
            text += &format!(", node {} line {:?}", peer, self.line_state(peer, addr));
        }
        text += &format!(", home {} directory {:?}", home, self.directory_entry(addr));
        text
    }

    /// Coherence invariants over the whole machine at the current cycle.
    pub fn check_invariants(&self) -> anyhow::Result<()> {
        let mut holders: BTreeMap<Addr, Vec<(NodeId, LineStatus)>> = BTreeMap::new();
        for node in &self.nodes {
            for (addr, status) in node.handler().lines().iter() {
                holders.entry(addr).or_default().push((node.id, status));
            }
            for (&addr, entry) in node.handler().directory().iter() {
                if !entry.is_consistent() {
                    bail!("node {}: inconsistent directory entry {:?} for {:#x}", node.id, entry, addr);
                }
                if self.home_of(addr) != node.id {
                    bail!("node {}: holds a directory entry for {:#x} homed at {}", node.id, addr, self.home_of(addr));
                }
                if entry.status() == DirStatus::Modified && entry.sharers().len() != 1 {
                    bail!("node {}: MODIFIED entry for {:#x} with sharers {:?}", node.id, addr, entry.sharers());
                }
            }
        }
        for (addr, held) in holders {
            let modified: Vec<NodeId> = held
                .iter()
                .filter(|(_, status)| *status == LineStatus::Modified)
                .map(|(id, _)| *id)
                .collect();
            if modified.len() > 1 {
                bail!("{:#x} is MODIFIED at nodes {:?}", addr, modified);
            }
            if !modified.is_empty() && held.len() > 1 {
                return Err(anyhow!("{:#x} is MODIFIED at node {} while shared by {:?}", addr, modified[0], held));
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            cycle: self.cycle,
            nodes: self
                .nodes
                .iter()
                .map(|node| NodeSnapshot {
                    lines: node.handler().lines().iter().collect(),
                    directory: node
                        .handler()
                        .directory()
                        .iter()
                        .filter(|(_, entry)| entry.status() != DirStatus::Uncached)
                        .map(|(&addr, entry)| (addr, entry.clone()))
                        .collect(),
                    completed_ops: node.completed_ops(),
                })
                .collect(),
        }
    }
}

impl ModuleBehaviors for System {
    type Error = ProtocolError;

    fn tick_one(&mut self) -> Result<(), ProtocolError> {
        self.step()
    }

    fn reset(&mut self) {
        self.nodes.iter_mut().for_each(Node::reset);
        self.cycle = 0;
    }
}
