#[cfg(test)]
mod system_tests;

use crate::coherence::{MsgKind, NodeId};
use crate::sim::config::{OpSpec, SimConfig, WorkloadConfig};
use crate::sim::top::System;
use crate::timeq::Cycle;

pub(super) fn config(num_nodes: usize) -> SimConfig {
    SimConfig {
        num_nodes,
        trace: true,
        check_invariants: true,
        timeout: 200_000,
        ..SimConfig::default()
    }
}

pub(super) fn workload(ops: &[&str]) -> WorkloadConfig {
    WorkloadConfig {
        ops: ops.iter().map(|op| op.parse::<OpSpec>().unwrap()).collect(),
    }
}

pub(super) fn system(num_nodes: usize, ops: &[&str]) -> System {
    System::new(config(num_nodes), &workload(ops), &[]).unwrap()
}

/// Step to completion, checking coherence after every cycle.
pub(super) fn run_checked(sys: &mut System, max_cycles: Cycle) -> Cycle {
    let start = sys.now();
    while !sys.is_finished() {
        if sys.now() - start >= max_cycles {
            panic!("not finished after {} cycles", max_cycles);
        }
        sys.step().unwrap();
        sys.check_invariants().unwrap();
    }
    sys.now() - start
}

/// Step until `cond` holds.
pub(super) fn step_until(sys: &mut System, max_cycles: Cycle, cond: impl Fn(&System) -> bool) {
    for _ in 0..max_cycles {
        if cond(sys) {
            return;
        }
        sys.step().unwrap();
        sys.check_invariants().unwrap();
    }
    panic!("condition not reached after {} cycles", max_cycles);
}

/// Network messages delivered to `node` since the last call, as (sender, kind).
pub(super) fn delivered(sys: &mut System, node: NodeId) -> Vec<(NodeId, MsgKind)> {
    let tracer = sys.node_mut(node).tracer();
    std::iter::from_fn(|| tracer.consume())
        .filter(|line| {
            !matches!(
                line.kind,
                MsgKind::CacheReadReply
                    | MsgKind::CacheUpdateAck
                    | MsgKind::CacheInvalidateAck
                    | MsgKind::CacheEvictionAlert
            )
        })
        .map(|line| (line.src, line.kind))
        .collect()
}
