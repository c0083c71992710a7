//! End-to-end transaction scenarios across stores, listeners and frames.

use std::sync::Arc;
use std::thread;

use stockpile_core::store::DiscreteFunction;
use stockpile_core::{
    Article, ChannelListener, Fraction, SlottedStore, StockpileError, StoreEvent, StoreListener,
    Transactor,
};

fn coal() -> Article {
    Article::item("coal")
}

fn channel_listener() -> (
    Arc<dyn StoreListener>,
    crossbeam_channel::Receiver<StoreEvent>,
) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Arc::new(ChannelListener::new(tx)), rx)
}

/// Sums the signed deltas of every `Changed` event received so far.
fn net_delta(rx: &crossbeam_channel::Receiver<StoreEvent>) -> Fraction {
    let mut net = Fraction::ZERO;
    while let Ok(event) = rx.try_recv() {
        if let StoreEvent::Changed { delta, .. } = event {
            net = net.add(delta);
        }
    }
    net
}

#[test]
fn test_nested_rollback_leaves_outer_intact() {
    let transactor = Transactor::new();
    let store = SlottedStore::new(4, 1000);
    let (listener, rx) = channel_listener();
    store.start_listening(&listener, false);

    let mut outer = transactor.open();
    assert_eq!(store.accept(&mut outer, &coal(), 10, false).unwrap(), 10);
    {
        let mut inner = transactor.open();
        assert_eq!(store.supply(&mut inner, &coal(), 5, false).unwrap(), 5);
        assert_eq!(store.amount_of(&coal()), 5);
        inner.rollback().unwrap();
    }
    // The inner frame's work is undone, the outer frame's is not.
    assert_eq!(store.amount_of(&coal()), 10);
    outer.commit().unwrap();
    assert_eq!(store.amount_of(&coal()), 10);

    // Listeners saw +10, -5, +5 (the rollback's inverse): net +10.
    assert_eq!(net_delta(&rx), Fraction::of_whole(10));
}

#[test]
fn test_rollback_emits_exact_inverse_sequence() {
    let transactor = Transactor::new();
    let store = SlottedStore::new(4, 1000);
    let (listener, rx) = channel_listener();
    store.start_listening(&listener, false);

    let mut txn = transactor.open();
    store.accept(&mut txn, &coal(), 7, false).unwrap();
    txn.rollback().unwrap();

    let events: Vec<StoreEvent> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    match (&events[0], &events[1]) {
        (
            StoreEvent::Changed {
                delta: forward,
                new_amount: after,
                ..
            },
            StoreEvent::Changed {
                delta: inverse,
                new_amount: restored,
                ..
            },
        ) => {
            assert_eq!(*forward, Fraction::of_whole(7));
            assert_eq!(*after, Fraction::of_whole(7));
            assert_eq!(*inverse, Fraction::of_whole(-7));
            assert!(restored.is_zero());
        }
        other => panic!("unexpected events: {other:?}"),
    }
    assert!(store.is_empty());
}

#[test]
fn test_transfer_conserves_articles() {
    let transactor = Transactor::new();
    let from = SlottedStore::new(2, 100);
    let to = SlottedStore::new(2, 30);

    let mut txn = transactor.open();
    from.accept(&mut txn, &coal(), 80, false).unwrap();

    // Move as much as the destination will take.
    let moved = to.accept(&mut txn, &coal(), 80, true).unwrap();
    assert_eq!(moved, 30);
    let supplied = from.supply(&mut txn, &coal(), moved, false).unwrap();
    assert_eq!(supplied, moved);
    assert_eq!(to.accept(&mut txn, &coal(), supplied, false).unwrap(), moved);
    txn.commit().unwrap();

    assert_eq!(from.amount_of(&coal()) + to.amount_of(&coal()), 80);
}

#[test]
fn test_simulation_does_not_enlist() {
    let transactor = Transactor::new();
    let store = SlottedStore::new(2, 100);
    let (listener, rx) = channel_listener();
    store.start_listening(&listener, false);

    let mut txn = transactor.open();
    assert_eq!(store.accept(&mut txn, &coal(), 10, true).unwrap(), 10);
    assert_eq!(store.supply(&mut txn, &coal(), 10, true).unwrap(), 0);
    txn.rollback().unwrap();

    // Nothing mutated, nothing enlisted, nothing notified.
    assert!(store.is_empty());
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_lifo_violation_is_reported_and_recovered() {
    let transactor = Transactor::new();
    let store = SlottedStore::new(2, 100);

    {
        let mut outer = transactor.open();
        store.accept(&mut outer, &coal(), 3, false).unwrap();
        let mut inner = transactor.open();
        store.accept(&mut inner, &coal(), 4, false).unwrap();

        let err = outer.commit().unwrap_err();
        assert_eq!(err, StockpileError::OutOfOrder { depth: 1, top: 2 });
        // Both guards drop here: the abandoned inner frame and the
        // consumed outer frame are force-rolled back.
    }
    assert!(store.is_empty());

    // The system is usable again afterwards.
    let mut txn = transactor.open();
    store.accept(&mut txn, &coal(), 1, false).unwrap();
    txn.commit().unwrap();
    assert_eq!(store.amount_of(&coal()), 1);
}

#[test]
fn test_listener_replay_on_subscribe_and_detach() {
    let transactor = Transactor::new();
    let store = SlottedStore::new(4, 100);
    let mut txn = transactor.open();
    store.accept(&mut txn, &coal(), 12, false).unwrap();
    store
        .accept(&mut txn, &Article::item("iron"), 5, false)
        .unwrap();
    txn.commit().unwrap();

    let (listener, rx) = channel_listener();
    store.start_listening(&listener, true);

    // Capacity first, then one synthetic accept per occupied handle.
    assert_eq!(
        rx.try_recv().unwrap(),
        StoreEvent::Capacity {
            store: store.store_id(),
            capacity: Fraction::of_whole(100),
        }
    );
    assert_eq!(net_delta(&rx), Fraction::of_whole(17));

    store.stop_listening(&listener, true);
    assert_eq!(net_delta(&rx), Fraction::of_whole(-17));
}

#[test]
fn test_commit_runs_closures_with_committed_flag() {
    use stockpile_core::transact::{DelegateId, Participant, RollbackFn};

    struct Flag {
        id: DelegateId,
        seen: Arc<parking_lot::Mutex<Vec<bool>>>,
    }

    impl Participant for Flag {
        fn delegate_id(&self) -> DelegateId {
            self.id
        }

        fn prepare_rollback(&self) -> RollbackFn {
            let seen = Arc::clone(&self.seen);
            Box::new(move |committed| seen.lock().push(committed))
        }
    }

    let transactor = Transactor::new();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let flag = Flag {
        id: DelegateId::allocate(),
        seen: Arc::clone(&seen),
    };

    let mut txn = transactor.open();
    txn.enlist(&flag).unwrap();
    txn.commit().unwrap();
    assert_eq!(seen.lock().as_slice(), &[true]);
}

#[test]
fn test_threads_interleave_whole_transactions() {
    let transactor = Arc::new(Transactor::new());
    let store = Arc::new(SlottedStore::new(4, 1_000_000));

    let mut threads = Vec::new();
    for _ in 0..4 {
        let transactor = Arc::clone(&transactor);
        let store = Arc::clone(&store);
        threads.push(thread::spawn(move || {
            for _ in 0..100 {
                let mut txn = transactor.open();
                store.accept(&mut txn, &coal(), 2, false).unwrap();
                store.supply(&mut txn, &coal(), 1, false).unwrap();
                txn.commit().unwrap();
            }
        }));
    }
    for t in threads {
        t.join().unwrap();
    }
    // Transactions serialized: every net +1 landed exactly once.
    assert_eq!(store.amount_of(&coal()), 400);
}
