use std::collections::BTreeSet;

use super::{config, delivered, run_checked, step_until, system, workload};
use crate::base::behavior::ModuleBehaviors;
use crate::coherence::{DirectoryEntry, LineStatus, MemOp, MsgKind};
use crate::sim::config::EvictSpec;
use crate::sim::top::System;

use MsgKind::*;

// Homed on node 0 for any node count.
const X: u64 = 0x0;

fn shared(nodes: &[usize]) -> DirectoryEntry {
    DirectoryEntry::Shared(nodes.iter().copied().collect::<BTreeSet<_>>())
}

/// Nodes 1 and 2 share X.
fn shared_by_1_and_2(num_nodes: usize) -> System {
    let mut sys = system(num_nodes, &["1:r:0x0", "2:r:0x0"]);
    run_checked(&mut sys, 200);
    assert_eq!(sys.directory_entry(X), shared(&[1, 2]));
    for node in 0..num_nodes {
        delivered(&mut sys, node);
    }
    sys
}

#[test]
fn write_to_uncached_line_is_granted_by_home() {
    let mut sys = system(4, &["1:w:0x0"]);
    run_checked(&mut sys, 100);

    assert_eq!(delivered(&mut sys, 0), vec![(1, WriteMiss)]);
    assert_eq!(delivered(&mut sys, 1), vec![(0, DataValueReply)]);
    assert_eq!(sys.directory_entry(X), DirectoryEntry::Modified(1));
    assert_eq!(sys.line_state(1, X), Some(LineStatus::Modified));
    assert_eq!(sys.nodes()[1].completed_ops(), 1);
}

#[test]
fn write_read_invalidate_sequence() {
    let mut sys = system(4, &["1:w:0x0"]);
    run_checked(&mut sys, 100);
    (0..4).for_each(|node| {
        delivered(&mut sys, node);
    });

    // read after a remote write: owner is fetched and downgraded
    sys.node_mut(2).push_op(MemOp::read(X));
    run_checked(&mut sys, 100);
    assert_eq!(delivered(&mut sys, 0), vec![(2, ReadMiss), (1, DataWriteBack)]);
    assert_eq!(delivered(&mut sys, 1), vec![(0, Fetch)]);
    assert_eq!(delivered(&mut sys, 2), vec![(0, DataValueReply)]);
    assert_eq!(sys.directory_entry(X), shared(&[1, 2]));
    assert_eq!(sys.line_state(1, X), Some(LineStatus::Shared));
    assert_eq!(sys.line_state(2, X), Some(LineStatus::Shared));

    // write to a shared line: both sharers are invalidated before the grant
    sys.node_mut(3).push_op(MemOp::write(X));
    step_until(&mut sys, 100, |sys| {
        sys.nodes()[0].handler().pending_acks(X).is_some()
    });
    assert_eq!(sys.nodes()[0].handler().pending_acks(X), Some(2));
    assert_eq!(sys.line_state(3, X), None);

    run_checked(&mut sys, 100);
    assert_eq!(
        delivered(&mut sys, 0),
        vec![(3, WriteMiss), (1, InvalidateAck), (2, InvalidateAck)]
    );
    assert_eq!(delivered(&mut sys, 1), vec![(0, Invalidate)]);
    assert_eq!(delivered(&mut sys, 2), vec![(0, Invalidate)]);
    assert_eq!(delivered(&mut sys, 3), vec![(0, DataValueReply)]);
    assert_eq!(sys.directory_entry(X), DirectoryEntry::Modified(3));
    assert_eq!(sys.line_state(1, X), None);
    assert_eq!(sys.line_state(2, X), None);
    assert_eq!(sys.line_state(3, X), Some(LineStatus::Modified));
}

#[test]
fn second_writer_waits_for_pending_acks() {
    let mut sys = shared_by_1_and_2(5);
    sys.node_mut(3).push_op(MemOp::write(X));
    sys.node_mut(4).push_op(MemOp::write(X));

    step_until(&mut sys, 100, |sys| {
        sys.nodes()[0].handler().pending_acks(X).is_some()
    });
    let home = sys.nodes()[0].handler();
    assert_eq!(home.pending_acks(X), Some(2));
    assert_eq!(home.blocked().len(X), 2);
    let queued: Vec<_> = home.blocked().iter(X).map(|msg| (msg.src, msg.kind)).collect();
    assert_eq!(queued, vec![(3, WriteMiss), (4, WriteMiss)]);

    run_checked(&mut sys, 200);
    assert_eq!(
        delivered(&mut sys, 0),
        vec![
            (3, WriteMiss),
            (4, WriteMiss),
            (1, InvalidateAck),
            (2, InvalidateAck),
            (3, DataWriteBack),
        ]
    );
    assert_eq!(delivered(&mut sys, 3), vec![(0, DataValueReply), (0, FetchInvalidate)]);
    assert_eq!(delivered(&mut sys, 4), vec![(0, DataValueReply)]);
    assert_eq!(sys.directory_entry(X), DirectoryEntry::Modified(4));
    assert_eq!(sys.line_state(3, X), None);
    assert_eq!(sys.line_state(4, X), Some(LineStatus::Modified));
}

#[test]
fn transactions_on_different_lines_proceed_independently() {
    // 0x280 is line 10, also homed on node 0 of 5
    const Y: u64 = 0x280;
    let mut sys = shared_by_1_and_2(5);
    assert_eq!(sys.home_of(Y), 0);
    sys.node_mut(3).push_op(MemOp::write(X));
    sys.node_mut(4).push_op(MemOp::write(Y));

    step_until(&mut sys, 100, |sys| {
        sys.nodes()[0].handler().pending_acks(X).is_some()
    });
    // Y is granted while X still waits on its sharers
    assert_eq!(sys.directory_entry(Y), DirectoryEntry::Modified(4));
    assert!(!sys.nodes()[0].handler().blocked().is_busy(Y));

    step_until(&mut sys, 100, |sys| sys.nodes()[4].completed_ops() == 1);
    assert_eq!(sys.nodes()[3].completed_ops(), 0);
    run_checked(&mut sys, 100);
    assert_eq!(sys.line_state(3, X), Some(LineStatus::Modified));
    assert_eq!(sys.line_state(4, Y), Some(LineStatus::Modified));
}

#[test]
fn sharer_upgrade_invalidates_the_other_sharer() {
    let mut sys = shared_by_1_and_2(4);
    sys.node_mut(1).push_op(MemOp::write(X));
    run_checked(&mut sys, 100);

    assert_eq!(delivered(&mut sys, 0), vec![(1, Invalidate), (2, InvalidateAck)]);
    assert_eq!(delivered(&mut sys, 1), vec![(0, InvalidateAck)]);
    assert_eq!(sys.directory_entry(X), DirectoryEntry::Modified(1));
    assert_eq!(sys.line_state(1, X), Some(LineStatus::Modified));
    assert_eq!(sys.line_state(2, X), None);
}

#[test]
fn home_node_takes_part_like_any_other() {
    let mut sys = system(3, &["0:r:0x0", "1:r:0x0", "0:w:0x0", "2:r:0x0", "1:w:0x0"]);
    run_checked(&mut sys, 500);

    assert_eq!(sys.nodes().iter().map(|n| n.completed_ops()).sum::<u64>(), 5);
    assert_eq!(sys.line_state(1, X), Some(LineStatus::Modified));
    assert_eq!(sys.line_state(0, X), None);
    assert_eq!(sys.line_state(2, X), None);
    assert_eq!(sys.directory_entry(X), DirectoryEntry::Modified(1));
}

#[test]
fn local_hits_stay_off_the_network() {
    let mut sys = system(2, &["1:w:0x0", "1:r:0x0", "1:w:0x0"]);
    run_checked(&mut sys, 100);
    assert_eq!(delivered(&mut sys, 0), vec![(1, WriteMiss)]);
    assert_eq!(delivered(&mut sys, 1), vec![(0, DataValueReply)]);
    assert_eq!(sys.nodes()[1].completed_ops(), 3);
}

#[test]
fn modified_eviction_writes_back_to_home() {
    let mut sys = system(4, &["1:w:0x0"]);
    run_checked(&mut sys, 100);
    delivered(&mut sys, 0);

    let now = sys.now();
    sys.node_mut(1).schedule_eviction(EvictSpec { node: 1, addr: X, cycle: now });
    run_checked(&mut sys, 100);
    assert_eq!(delivered(&mut sys, 0), vec![(1, DataWriteBack)]);
    assert_eq!(sys.line_state(1, X), None);
    assert_eq!(sys.directory_entry(X), DirectoryEntry::Uncached);
}

#[test]
fn eviction_racing_a_fetch_completes_the_read() {
    let mut sys = system(4, &["1:w:0x0"]);
    run_checked(&mut sys, 100);
    (0..4).for_each(|node| {
        delivered(&mut sys, node);
    });

    let now = sys.now();
    sys.node_mut(2).push_op(MemOp::read(X));
    sys.node_mut(1).schedule_eviction(EvictSpec { node: 1, addr: X, cycle: now });
    run_checked(&mut sys, 100);

    // the eviction write-back answers the fetch, which is then dropped by the old owner
    assert_eq!(delivered(&mut sys, 0), vec![(2, ReadMiss), (1, DataWriteBack)]);
    assert_eq!(delivered(&mut sys, 1), vec![(0, Fetch)]);
    assert_eq!(sys.line_state(1, X), None);
    assert_eq!(sys.line_state(2, X), Some(LineStatus::Shared));
    assert!(sys.directory_entry(X).is_sharer(2));
}

#[test]
fn silent_shared_eviction_still_acks_invalidate() {
    let mut sys = shared_by_1_and_2(4);
    let now = sys.now();
    sys.node_mut(2).schedule_eviction(EvictSpec { node: 2, addr: X, cycle: now });
    run_checked(&mut sys, 50);
    assert_eq!(sys.line_state(2, X), None);
    assert!(delivered(&mut sys, 0).is_empty());

    sys.node_mut(3).push_op(MemOp::write(X));
    run_checked(&mut sys, 100);
    assert_eq!(sys.directory_entry(X), DirectoryEntry::Modified(3));
    // node 2 has nothing to invalidate and answers without waiting on its cache
    assert_eq!(
        delivered(&mut sys, 0),
        vec![(3, WriteMiss), (2, InvalidateAck), (1, InvalidateAck)]
    );
}

#[test]
fn addresses_are_folded_to_lines() {
    let mut sys = system(4, &["1:w:0x7", "2:r:0x3f"]);
    run_checked(&mut sys, 200);
    assert_eq!(sys.directory_entry(X), shared(&[1, 2]));
    assert_eq!(sys.line_state(2, 0x20), Some(LineStatus::Shared));
}

#[test]
fn parallel_stepping_matches_sequential() {
    let ops = [
        "0:w:0x40", "1:r:0x40", "2:w:0x80", "3:r:0x0", "1:w:0x0", "2:r:0x40", "3:w:0x40",
        "0:r:0x80", "1:r:0x80", "2:w:0x0", "3:r:0xc0", "0:w:0xc0",
    ];
    let evictions = [EvictSpec { node: 2, addr: 0x80, cycle: 12 }];
    let mut seq = System::new(config(4), &workload(&ops), &evictions).unwrap();
    let mut par = System::new(
        crate::sim::config::SimConfig { parallel: true, ..config(4) },
        &workload(&ops),
        &evictions,
    )
    .unwrap();
    let seq_cycles = seq.run().unwrap();
    let par_cycles = par.run().unwrap();
    assert_eq!(seq_cycles, par_cycles);
    assert_eq!(
        serde_json::to_value(seq.snapshot()).unwrap(),
        serde_json::to_value(par.snapshot()).unwrap()
    );
}

#[test]
fn run_times_out() {
    let mut sys = System::new(
        crate::sim::config::SimConfig { timeout: 3, ..config(4) },
        &workload(&["1:w:0x0"]),
        &[],
    )
    .unwrap();
    let err = sys.run().unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");
}

#[test]
fn snapshot_serializes_directory_and_lines() {
    let mut sys = system(2, &["1:r:0x0"]);
    sys.run().unwrap();
    let json = serde_json::to_value(sys.snapshot()).unwrap();
    assert_eq!(json["nodes"][0]["directory"]["0"]["status"], "SHARED");
    assert_eq!(json["nodes"][0]["directory"]["0"]["sharers"], serde_json::json!([1]));
    assert_eq!(json["nodes"][1]["lines"]["0"], "SHARED");
    assert_eq!(json["nodes"][1]["completed_ops"], 1);
}

#[test]
fn reset_clears_every_node() {
    let mut sys = system(3, &["1:w:0x0", "2:r:0x0"]);
    sys.run().unwrap();
    sys.reset();
    assert_eq!(sys.now(), 0);
    assert!(sys.is_finished());
    assert_eq!(sys.directory_entry(X), DirectoryEntry::Uncached);
    assert!(sys.snapshot().nodes.iter().all(|n| n.lines.is_empty()));
}

#[test]
fn home_reads_back_while_owner_upgrades() {
    // 0x40 is homed on node 1, which pulls the line back from node 0 while node 0 writes again.
    let sim = crate::sim::config::SimConfig {
        num_nodes: 2,
        node_latency: 1,
        cache_latency: 1,
        ..config(2)
    };
    let mut sys = System::new(sim, &workload(&["0:w:0x40", "0:w:0x40", "1:r:0x40"]), &[]).unwrap();
    run_checked(&mut sys, 1_000);
    assert_eq!(sys.nodes().iter().map(|n| n.completed_ops()).sum::<u64>(), 3);
    assert!(sys.line_state(0, 0x40).is_some());
}

#[test]
fn home_fill_races_remote_write() {
    for node_latency in 1..=4 {
        for cache_latency in 1..=3 {
            let sim = crate::sim::config::SimConfig {
                num_nodes: 2,
                node_latency,
                cache_latency,
                ..config(2)
            };
            let mut sys = System::new(sim, &workload(&["0:r:0x0", "1:w:0x0", "0:r:0x0"]), &[]).unwrap();
            run_checked(&mut sys, 1_000);
            assert_eq!(sys.nodes()[0].completed_ops(), 2, "latencies {node_latency}/{cache_latency}");
            assert_eq!(sys.nodes()[1].completed_ops(), 1, "latencies {node_latency}/{cache_latency}");
        }
    }
}

#[test]
fn out_of_range_nodes_are_rejected() {
    let err = System::new(config(2), &workload(&["2:r:0x0"]), &[]).err().unwrap();
    assert!(format!("{err:#}").contains("names node 2"), "{err:#}");

    let evictions = [EvictSpec { node: 5, addr: 0x40, cycle: 1 }];
    let err = System::new(config(2), &workload(&["1:r:0x40"]), &evictions).err().unwrap();
    assert!(err.to_string().contains("names node 5"), "{err}");

    let sim = crate::sim::config::SimConfig { num_nodes: 0, ..config(2) };
    assert!(System::new(sim, &workload(&[]), &[]).is_err());
}
