use std::fmt;
use std::str::FromStr;

use anyhow::ensure;
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use toml::*;

use crate::coherence::{Addr, MemOp, NodeId};
use crate::timeq::{Cycle, Latency};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    #[default]
    Read,
    Write,
}

impl FromStr for OpKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "r" | "read" => Ok(Self::Read),
            "w" | "write" => Ok(Self::Write),
            _ => Err(format!(
                "unsupported op '{}', expected one of: r, read, w, write",
                value
            )),
        }
    }
}

/// One entry of a node's program.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct OpSpec {
    pub node: NodeId,
    pub addr: Addr,
    pub op: OpKind,
}

impl OpSpec {
    pub fn mem_op(&self) -> MemOp {
        match self.op {
            OpKind::Read => MemOp::read(self.addr),
            OpKind::Write => MemOp::write(self.addr),
        }
    }
}

fn parse_addr(value: &str) -> Result<Addr, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => Addr::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|err| format!("bad address '{}': {}", value, err))
}

/// `NODE:r|w:ADDR`, e.g. `1:w:0x40`.
impl FromStr for OpSpec {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = value.split(':').collect();
        let &[node, op, addr] = fields.as_slice() else {
            return Err(format!("expected NODE:r|w:ADDR, got '{}'", value));
        };
        Ok(Self {
            node: node
                .parse()
                .map_err(|err| format!("bad node '{}': {}", node, err))?,
            op: op.parse()?,
            addr: parse_addr(addr)?,
        })
    }
}

impl fmt::Display for OpSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            OpKind::Read => 'r',
            OpKind::Write => 'w',
        };
        write!(f, "{}:{}:{:#x}", self.node, op, self.addr)
    }
}

/// A line dropped by a node's cache at a given cycle.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct EvictSpec {
    pub node: NodeId,
    pub addr: Addr,
    pub cycle: Cycle,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub num_nodes: usize,
    pub line_bytes: u64,
    pub node_latency: Latency,
    pub cache_latency: Latency,
    pub timeout: u64,
    pub log_level: u64,
    pub parallel: bool,
    pub check_invariants: bool,
    pub trace: bool,
}

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_nodes: 4,
            line_bytes: 64,
            node_latency: 2,
            cache_latency: 1,
            timeout: 100000,
            log_level: 0,
            parallel: false,
            check_invariants: false,
            trace: false,
        }
    }
}

impl SimConfig {
    pub fn ensure_valid(&self) -> anyhow::Result<()> {
        ensure!(self.num_nodes > 0, "need at least one node");
        ensure!(self.line_bytes > 0, "line size must be positive");
        ensure!(self.node_latency > 0, "node latency must be positive");
        ensure!(self.timeout > 0, "timeout must be positive");
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct WorkloadConfig {
    pub ops: Vec<OpSpec>,
}

impl Config for WorkloadConfig {}

impl WorkloadConfig {
    pub fn ensure_valid(&self, num_nodes: usize) -> anyhow::Result<()> {
        for op in &self.ops {
            ensure!(
                op.node < num_nodes,
                "op {} names node {}, but there are only {} nodes",
                op,
                op.node,
                num_nodes
            );
        }
        Ok(())
    }
}

/// Scheduled evictions, read from the `[[evict]]` array of tables.
pub fn evictions_from(section: Option<&Value>) -> Vec<EvictSpec> {
    match section {
        Some(value) => value.clone().try_into().expect("cannot deserialize evictions"),
        None => Vec::new(),
    }
}
