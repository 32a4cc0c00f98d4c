// Replicated KV scenarios over a live in-memory cluster: quorum CRUD,
// replica placement, repair after failure, and quorum loss under partition.

mod common;

use common::SimCluster;
use quorum_kv::event::EventKind;
use quorum_kv::net::Network;
use quorum_kv::store::ReplicaRole;
use quorum_kv::Address;

const KEY: &str = "k";
const VALUE: &str = "v";

/// Converged 5-peer cluster with one replicated record, plus the replica
/// triple of the key.
fn cluster_with_record() -> (SimCluster, Vec<Address>) {
    let mut cluster = SimCluster::new(5);
    cluster.run(10);

    cluster.peer_mut(1).create(KEY, VALUE);
    cluster.run(3);

    let triple: Vec<Address> = cluster
        .peer(1)
        .ring()
        .replicas_for(KEY)
        .iter()
        .map(|n| n.addr)
        .collect();
    assert_eq!(triple.len(), 3);
    (cluster, triple)
}

#[test]
fn test_create_reaches_quorum_and_replicas() {
    let (cluster, triple) = cluster_with_record();

    // One coordinator-side success on the calling peer.
    let coordinator_successes = cluster.log.count_where(|e| {
        e.observer == SimCluster::addr(1)
            && matches!(
                e.kind,
                EventKind::CreateSuccess { coordinator: true, .. }
            )
    });
    assert_eq!(coordinator_successes, 1);

    // Exactly three server-side successes, one per ring replica.
    for replica in &triple {
        let server_successes = cluster.log.count_where(|e| {
            e.observer == *replica
                && matches!(
                    e.kind,
                    EventKind::CreateSuccess { coordinator: false, .. }
                )
        });
        assert_eq!(server_successes, 1, "replica {replica} applied the create");
    }
    let total_server = cluster.log.count_where(|e| {
        matches!(e.kind, EventKind::CreateSuccess { coordinator: false, .. })
    });
    assert_eq!(total_server, 3);

    // Records carry the role matching their triple position.
    let roles = [
        ReplicaRole::Primary,
        ReplicaRole::Secondary,
        ReplicaRole::Tertiary,
    ];
    for (replica, role) in triple.iter().zip(roles) {
        let record = cluster
            .peer(replica.id)
            .store()
            .read(KEY)
            .expect("replica holds the record");
        assert_eq!(record.value, VALUE);
        assert_eq!(record.role, role);
    }

    // Peers outside the triple hold nothing.
    for peer in &cluster.peers {
        if !triple.contains(&peer.addr()) {
            assert!(peer.store().read(KEY).is_none());
        }
    }
}

#[test]
fn test_read_from_any_peer_returns_value() {
    let (mut cluster, _) = cluster_with_record();

    for reader in 1..=5u32 {
        let trans_id = cluster.peer_mut(reader).read(KEY);
        cluster.run(3);
        let successes = cluster.log.count_where(|e| {
            e.observer == SimCluster::addr(reader)
                && matches!(
                    &e.kind,
                    EventKind::ReadSuccess { coordinator: true, trans_id: id, value, .. }
                        if *id == trans_id && value.as_str() == VALUE
                )
        });
        assert_eq!(successes, 1, "reader {reader} resolves exactly once");
    }
}

#[test]
fn test_update_and_delete_round_trip() {
    let (mut cluster, _) = cluster_with_record();

    let update_id = cluster.peer_mut(3).update(KEY, "v2");
    cluster.run(3);
    assert_eq!(
        cluster.log.count_where(|e| matches!(
            &e.kind,
            EventKind::UpdateSuccess { coordinator: true, trans_id, .. } if *trans_id == update_id
        )),
        1
    );

    let read_id = cluster.peer_mut(4).read(KEY);
    cluster.run(3);
    assert_eq!(
        cluster.log.count_where(|e| matches!(
            &e.kind,
            EventKind::ReadSuccess { coordinator: true, trans_id, value, .. }
                if *trans_id == read_id && value.as_str() == "v2"
        )),
        1
    );

    let delete_id = cluster.peer_mut(5).delete(KEY);
    cluster.run(3);
    assert_eq!(
        cluster.log.count_where(|e| matches!(
            &e.kind,
            EventKind::DeleteSuccess { coordinator: true, trans_id, .. } if *trans_id == delete_id
        )),
        1
    );
    for peer in &cluster.peers {
        assert!(peer.store().read(KEY).is_none());
    }

    // Reading a deleted key fails cleanly.
    let miss_id = cluster.peer_mut(1).read(KEY);
    cluster.run(3);
    assert_eq!(
        cluster.log.count_where(|e| matches!(
            &e.kind,
            EventKind::ReadFail { coordinator: true, trans_id, .. } if *trans_id == miss_id
        )),
        1
    );
}

#[test]
fn test_write_survives_one_silent_replica() {
    let mut cluster = SimCluster::new(5);
    cluster.run(10);

    // Kill one replica of the key and write before anyone detects it: the
    // two remaining acks still make quorum.
    let triple: Vec<Address> = cluster
        .peer(1)
        .ring()
        .replicas_for(KEY)
        .iter()
        .map(|n| n.addr)
        .collect();
    let victim = triple
        .iter()
        .find(|a| **a != SimCluster::addr(1))
        .copied()
        .unwrap();
    cluster.crash(victim.id);

    let trans_id = cluster.peer_mut(1).create(KEY, VALUE);
    cluster.run(3);
    assert_eq!(
        cluster.log.count_where(|e| matches!(
            &e.kind,
            EventKind::CreateSuccess { coordinator: true, trans_id: id, .. } if *id == trans_id
        )),
        1
    );
}

#[test]
fn test_primary_loss_repairs_placement() {
    let (mut cluster, triple) = cluster_with_record();

    let primary = triple[0];
    cluster.crash(primary.id);

    // Detection (t_fail), eviction-independent ring rebuild, stabilization.
    cluster.run(30);

    let survivor = cluster.live_ids()[0];
    let new_triple: Vec<Address> = cluster
        .peer(survivor)
        .ring()
        .replicas_for(KEY)
        .iter()
        .map(|n| n.addr)
        .collect();
    assert_eq!(new_triple.len(), 3);
    assert!(!new_triple.contains(&primary));

    // The record lives on exactly the new triple.
    for peer in &cluster.peers {
        if peer.is_failed() {
            continue;
        }
        let holds = peer.store().read(KEY).is_some();
        assert_eq!(
            holds,
            new_triple.contains(&peer.addr()),
            "placement wrong at {}",
            peer.addr()
        );
    }

    // And the value is still readable with quorum.
    let reader = new_triple[1].id;
    let trans_id = cluster.peer_mut(reader).read(KEY);
    cluster.run(3);
    assert_eq!(
        cluster.log.count_where(|e| matches!(
            &e.kind,
            EventKind::ReadSuccess { coordinator: true, trans_id: id, value, .. }
                if *id == trans_id && value.as_str() == VALUE
        )),
        1
    );
}

#[test]
fn test_partitioned_coordinator_times_out_once() {
    let mut cluster = SimCluster::new(3);
    cluster.run(10);

    cluster.peer_mut(1).create(KEY, VALUE);
    cluster.run(3);

    // Cut peer 1 off from both other replicas, then update from peer 1:
    // only its own replica can acknowledge, which is short of quorum.
    cluster.network.sever(SimCluster::addr(1), SimCluster::addr(2));
    cluster.network.sever(SimCluster::addr(1), SimCluster::addr(3));

    let trans_id = cluster.peer_mut(1).update(KEY, "v2");
    cluster.run(13);

    assert_eq!(
        cluster.log.count_where(|e| matches!(
            &e.kind,
            EventKind::UpdateFail { coordinator: true, trans_id: id, .. } if *id == trans_id
        )),
        1
    );
    assert_eq!(
        cluster.log.count_where(|e| matches!(
            &e.kind,
            EventKind::UpdateSuccess { coordinator: true, trans_id: id, .. } if *id == trans_id
        )),
        0
    );

    // The isolated replicas never saw the new value.
    assert_eq!(cluster.peer(2).store().read(KEY).unwrap().value, VALUE);
    assert_eq!(cluster.peer(3).store().read(KEY).unwrap().value, VALUE);
}

#[test]
fn test_read_prefers_majority_on_divergence() {
    let (mut cluster, triple) = cluster_with_record();

    // Poison one replica through the normal server path so its copy
    // diverges from the other two.
    let poisoned = triple[2];
    let rogue = quorum_kv::net::Message::new(
        0x9000_0000,
        Address::new(99, 0),
        quorum_kv::net::Payload::KvUpdate {
            key: KEY.to_string(),
            value: "divergent".to_string(),
            replica: ReplicaRole::Tertiary,
        },
    );
    cluster
        .network
        .send(Address::new(99, 0), poisoned, rogue.encode());
    cluster.run(2);
    assert_eq!(
        cluster.peer(poisoned.id).store().read(KEY).unwrap().value,
        "divergent"
    );

    let trans_id = cluster.peer_mut(1).read(KEY);
    cluster.run(3);
    assert_eq!(
        cluster.log.count_where(|e| matches!(
            &e.kind,
            EventKind::ReadSuccess { coordinator: true, trans_id: id, value, .. }
                if *id == trans_id && value.as_str() == VALUE
        )),
        1,
        "the two agreeing replicas outvote the divergent one"
    );
}
