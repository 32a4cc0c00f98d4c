// Membership and failure-detection scenarios driven over a real in-memory
// cluster: introducer boot, single join, eventual agreement, failure
// detection timing, and heartbeat monotonicity.

mod common;

use common::SimCluster;
use quorum_kv::event::EventKind;
use std::collections::HashMap;

#[test]
fn test_introducer_boots_alone() {
    let mut cluster = SimCluster::new(1);
    cluster.run(1);

    assert!(cluster.peer(1).in_group());
    assert_eq!(cluster.view_of(1), vec![1]);
    assert!(cluster.events().is_empty(), "no events beyond self boot");
}

#[test]
fn test_single_join_within_three_ticks() {
    let mut cluster = SimCluster::new(2);
    cluster.run(3);

    assert!(cluster.peer(2).in_group());
    assert_eq!(cluster.view_of(1), vec![1, 2]);
    assert_eq!(cluster.view_of(2), vec![1, 2]);

    // One NodeAdd per observer for the peer it newly learned.
    for (observer, learned) in [(1u32, 2u32), (2, 1)] {
        let count = cluster.log.count_where(|e| {
            e.observer == SimCluster::addr(observer)
                && matches!(e.kind, EventKind::NodeAdd { added } if added == SimCluster::addr(learned))
        });
        assert_eq!(count, 1, "observer {observer} learns {learned} once");
    }
}

#[test]
fn test_membership_eventually_agrees() {
    let mut cluster = SimCluster::new(5);
    cluster.run(30);

    for id in 1..=5 {
        assert_eq!(cluster.view_of(id), vec![1, 2, 3, 4, 5]);
    }
}

#[test]
fn test_failure_detected_and_evicted() {
    let mut cluster = SimCluster::new(4);
    cluster.run(30);
    for id in 1..=4 {
        assert_eq!(cluster.view_of(id).len(), 4);
    }

    cluster.crash(4);

    // Suspicion fires within t_fail plus a little gossip latency; each
    // survivor logs NodeRemove exactly once.
    cluster.run(12);
    for observer in 1..=3u32 {
        let removals = cluster.log.count_where(|e| {
            e.observer == SimCluster::addr(observer)
                && matches!(e.kind, EventKind::NodeRemove { removed } if removed == SimCluster::addr(4))
        });
        assert_eq!(removals, 1, "survivor {observer} suspects the crash once");
        assert!(!cluster.view_of(observer).contains(&4));
    }

    // Past t_remove the entry is gone from the lists, with no second event.
    cluster.run(15);
    for observer in 1..=3u32 {
        assert!(cluster
            .peer(observer)
            .members()
            .iter()
            .all(|m| m.id != 4));
        let removals = cluster.log.count_where(|e| {
            e.observer == SimCluster::addr(observer)
                && matches!(e.kind, EventKind::NodeRemove { removed } if removed == SimCluster::addr(4))
        });
        assert_eq!(removals, 1);
    }
}

#[test]
fn test_heartbeats_never_regress() {
    let mut cluster = SimCluster::new(4);
    cluster.run(10);

    // (observer, member) -> last heartbeat seen
    let mut highest: HashMap<(u32, u32), i64> = HashMap::new();
    for _ in 0..25 {
        cluster.tick();
        for observer in 1..=4u32 {
            for entry in cluster.peer(observer).members() {
                let watermark = highest.entry((observer, entry.id)).or_insert(i64::MIN);
                assert!(
                    entry.heartbeat >= *watermark,
                    "heartbeat of {} regressed at observer {}",
                    entry.id,
                    observer
                );
                *watermark = entry.heartbeat;
            }
        }
    }
}

#[test]
fn test_rejoin_after_eviction_is_relearned() {
    let mut cluster = SimCluster::new(3);
    cluster.run(30);

    cluster.crash(3);
    cluster.run(30); // suspected, then evicted everywhere

    assert!(!cluster.view_of(1).contains(&3));
    assert!(!cluster.view_of(2).contains(&3));

    // A fresh process at the same address joins through the introducer.
    cluster.network.revive(SimCluster::addr(3));
    let fresh = quorum_kv::Peer::new(
        SimCluster::addr(3),
        quorum_kv::PeerConfig::default(),
        cluster.network.clone(),
        cluster.clock.clone(),
        cluster.log.clone(),
    )
    .unwrap();
    let index = cluster
        .peers
        .iter()
        .position(|p| p.addr() == SimCluster::addr(3))
        .unwrap();
    cluster.peers[index] = fresh;

    cluster.run(10);
    assert_eq!(cluster.view_of(1), vec![1, 2, 3]);
    assert_eq!(cluster.view_of(3), vec![1, 2, 3]);
}
