use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    thread::scope,
};

use snowcast::{
    Error, InMemoryLeaseStore, LeaseState, LeaseTable, LesseeId, MonotonicClock, ReleaseOutcome,
    Request, Response, SequencerState, Snowcast, SnowcastEpoch, SnowcastId, execute,
};

fn cluster(backup_capacity: u16) -> (Arc<InMemoryLeaseStore>, LeaseTable) {
    let store = Arc::new(InMemoryLeaseStore::new(backup_capacity));
    let table = LeaseTable::new(store.clone());
    (store, table)
}

#[test]
fn many_members_generate_disjoint_ids() {
    const MEMBERS: usize = 6;
    const IDS_PER_MEMBER: usize = 5_000;

    let (_, table) = cluster(1);
    let clock = MonotonicClock::default();
    let seen: Mutex<HashSet<SnowcastId>> = Mutex::new(HashSet::new());

    scope(|s| {
        for _ in 0..MEMBERS {
            let table = table.clone();
            let clock = clock.clone();
            let seen = &seen;
            s.spawn(move || {
                let member = Snowcast::new(table, clock);
                let sequencer = member
                    .create_sequencer_with("orders", SnowcastEpoch::DEFAULT, 128)
                    .unwrap();
                let ids: Vec<_> = (0..IDS_PER_MEMBER)
                    .map(|_| sequencer.next_id().unwrap())
                    .collect();
                let node = sequencer.logical_node_id().unwrap();
                assert!(ids.iter().all(|id| sequencer.logical_node_id_of(*id) == node));

                let mut seen = seen.lock().unwrap();
                for id in ids {
                    assert!(seen.insert(id));
                }
            });
        }
    });

    assert_eq!(seen.lock().unwrap().len(), MEMBERS * IDS_PER_MEMBER);
}

#[test]
fn slot_handed_back_and_forth_never_repeats_an_id() {
    const HANDOVERS: usize = 200;

    let (_, table) = cluster(1);
    let clock = MonotonicClock::default();
    let a = Snowcast::new(table.clone(), clock.clone());
    let b = Snowcast::new(table, clock);
    let seq_a = a.create_sequencer("seq", SnowcastEpoch::DEFAULT).unwrap();
    let mut seq_b = None;
    let mut seen = HashSet::new();

    for handover in 0..HANDOVERS {
        let (member, current) = if handover % 2 == 0 {
            (&a, &seq_a)
        } else {
            (&b, seq_b.as_ref().unwrap())
        };
        assert_eq!(current.logical_node_id(), Some(0));
        for _ in 0..3 {
            let id = current.next_id().unwrap();
            assert!(seen.insert(id), "{id:?} issued twice on slot 0");
        }

        // Alternate a graceful detach with a lost connection.
        if handover % 4 < 2 {
            assert_eq!(current.detach().unwrap(), ReleaseOutcome::Released);
        } else {
            assert_eq!(member.disconnect().unwrap(), 1);
        }

        if handover % 2 == 0 {
            match &seq_b {
                Some(handle) => assert_eq!(handle.attach().unwrap(), 0),
                None => seq_b = Some(b.create_sequencer("seq", SnowcastEpoch::DEFAULT).unwrap()),
            }
        } else {
            assert_eq!(seq_a.attach().unwrap(), 0);
        }
    }

    assert_eq!(seen.len(), HANDOVERS * 3);
}

#[test]
fn destroy_reaches_every_member_and_recreate_starts_fresh() {
    let (_, table) = cluster(1);
    let a = Snowcast::new(table.clone(), MonotonicClock::default());
    let b = Snowcast::new(table.clone(), MonotonicClock::default());

    let seq_a = a.create_sequencer("seq1", SnowcastEpoch::DEFAULT).unwrap();
    let seq_b = b.create_sequencer("seq1", SnowcastEpoch::DEFAULT).unwrap();
    assert_eq!(table.leases("seq1").unwrap().len(), 2);

    a.destroy_sequencer(&seq_a).unwrap();
    assert_eq!(seq_b.state(), SequencerState::Destroyed);
    assert_eq!(
        seq_b.next_id(),
        Err(Error::InvalidState(SequencerState::Destroyed))
    );

    let new_epoch = SnowcastEpoch::from_unix_millis(SnowcastEpoch::DEFAULT.unix_millis() + 1);
    let fresh = b.create_sequencer("seq1", new_epoch).unwrap();
    assert_eq!(fresh.logical_node_id(), Some(0));
    assert_eq!(fresh.epoch(), new_epoch);
    assert_eq!(table.leases("seq1").unwrap().len(), 1);
}

#[test]
fn mismatched_epoch_conflicts_across_members() {
    let (_, table) = cluster(1);
    let a = Snowcast::new(table.clone(), MonotonicClock::default());
    let b = Snowcast::new(table, MonotonicClock::default());

    let epoch_a = SnowcastEpoch::from_unix_millis(1_700_000_000_000);
    let epoch_b = SnowcastEpoch::from_unix_millis(1_700_000_000_001);
    a.create_sequencer_with("seq1", epoch_a, 256).unwrap();

    match b.create_sequencer_with("seq1", epoch_b, 256) {
        Err(Error::ConfigurationConflict {
            existing_epoch_ms,
            requested_epoch_ms,
            ..
        }) => {
            assert_eq!(existing_epoch_ms, epoch_a.unix_millis());
            assert_eq!(requested_epoch_ms, epoch_b.unix_millis());
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
    assert!(matches!(
        b.create_sequencer_with("seq1", epoch_a, 512),
        Err(Error::ConfigurationConflict { .. })
    ));
}

#[test]
fn leases_survive_primary_failover() {
    let (store, table) = cluster(2);
    let a = Snowcast::new(table.clone(), MonotonicClock::default()).with_backup_count(1);
    let b = Snowcast::new(table.clone(), MonotonicClock::default()).with_backup_count(1);

    let seq_a = a.create_sequencer("seq", SnowcastEpoch::DEFAULT).unwrap();
    assert_eq!(seq_a.logical_node_id(), Some(0));

    assert!(store.failover().unwrap().is_empty());

    // The acknowledged lease is still there: the next member gets slot 1.
    let seq_b = b.create_sequencer("seq", SnowcastEpoch::DEFAULT).unwrap();
    assert_eq!(seq_b.logical_node_id(), Some(1));
    assert_eq!(seq_a.state(), SequencerState::Attached);
    assert!(seq_a.next_id().is_ok());
}

#[test]
fn unreplicated_sequencers_are_lost_on_failover() {
    let (store, table) = cluster(1);
    let member = Snowcast::new(table, MonotonicClock::default()).with_backup_count(0);
    let sequencer = member.create_sequencer("volatile", SnowcastEpoch::DEFAULT).unwrap();

    assert_eq!(store.failover().unwrap(), vec!["volatile".to_owned()]);
    assert_eq!(sequencer.state(), SequencerState::Destroyed);
}

#[test]
fn remote_requests_share_the_table_with_local_members() {
    let (_, table) = cluster(1);
    let local = Snowcast::new(table.clone(), MonotonicClock::default());
    let local_seq = local
        .create_sequencer_with("seq", SnowcastEpoch::DEFAULT, 128)
        .unwrap();

    let remote = LesseeId::new(42);
    let response = execute(
        &table,
        Request::Attach {
            name: "seq".into(),
            epoch_offset_millis: SnowcastEpoch::DEFAULT.unix_millis(),
            max_logical_node_count: 128,
            backup_count: 1,
            lessee: remote,
        },
    )
    .unwrap();
    let Response::Attached {
        logical_node_id, ..
    } = response
    else {
        panic!("unexpected response {response:?}");
    };
    assert_eq!(logical_node_id, 1);

    // A remote detach cannot release the local member's slot.
    assert_eq!(
        execute(
            &table,
            Request::Detach {
                name: "seq".into(),
                logical_node_id: 0,
                lessee: remote,
            },
        )
        .unwrap(),
        Response::Detached {
            outcome: ReleaseOutcome::Stale
        }
    );
    assert_eq!(local_seq.state(), SequencerState::Attached);

    assert_eq!(table.on_lessee_disconnect(remote).unwrap(), 1);
    let leases = table.leases("seq").unwrap();
    assert_eq!(leases[1].state, LeaseState::Detached);
    assert_eq!(leases[1].lessee, remote);

    execute(&table, Request::Destroy { name: "seq".into() }).unwrap();
    assert_eq!(local_seq.state(), SequencerState::Destroyed);
}
