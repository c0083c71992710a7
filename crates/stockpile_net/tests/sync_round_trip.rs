//! Authoritative store to remote mirror, through the real wire format.

use std::sync::Arc;

use stockpile_core::store::DiscreteFunction;
use stockpile_core::{
    Article, ChannelListener, Fraction, InMemoryArticleRegistry, SlottedStore, StoreEvent,
    StoreListener, Transactor,
};
use stockpile_net::{StoreMirror, SyncEntry, SyncKind, SyncMessage};

/// Turns the events a store emitted into one Update message, the way a
/// server-side session would after each committed transaction.
fn updates_from_events(rx: &crossbeam_channel::Receiver<StoreEvent>) -> SyncMessage {
    let mut entries = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let StoreEvent::Changed {
            handle,
            article,
            new_amount,
            ..
        } = event
        {
            entries.push(SyncEntry {
                article,
                amount: new_amount,
                handle: u32::try_from(handle).unwrap(),
            });
        }
    }
    SyncMessage {
        kind: SyncKind::Update,
        entries,
        capacity: None,
    }
}

#[test]
fn test_store_events_drive_a_remote_mirror() {
    let registry = InMemoryArticleRegistry::new();
    registry.register(&Article::item("coal"));
    registry.register(&Article::item("iron_ingot"));

    let transactor = Transactor::new();
    let store = SlottedStore::new(4, 64);
    let (tx, rx) = crossbeam_channel::unbounded();
    let listener: Arc<dyn StoreListener> = Arc::new(ChannelListener::new(tx));
    store.start_listening(&listener, false);

    let mirror = StoreMirror::new();
    mirror.apply(&SyncMessage {
        kind: SyncKind::FullRefresh,
        entries: Vec::new(),
        capacity: Some(Fraction::of_whole(64)),
    });

    // First transaction: stock up.
    {
        let mut txn = transactor.open();
        store.accept(&mut txn, &Article::item("coal"), 30, false).unwrap();
        store
            .accept(&mut txn, &Article::item("iron_ingot"), 10, false)
            .unwrap();
        txn.commit().unwrap();
    }
    let bytes = updates_from_events(&rx).encode(&registry).unwrap();
    mirror.apply(&SyncMessage::decode(&bytes, &registry).unwrap());

    assert_eq!(mirror.used(), Fraction::of_whole(40));
    assert_eq!(mirror.entry_count(), 2);

    // Second transaction: drain the coal completely.
    {
        let mut txn = transactor.open();
        store.supply(&mut txn, &Article::item("coal"), 30, false).unwrap();
        txn.commit().unwrap();
    }
    let bytes = updates_from_events(&rx).encode(&registry).unwrap();
    mirror.apply(&SyncMessage::decode(&bytes, &registry).unwrap());

    // The drained handle disappeared from the mirror; the aggregate tracks.
    assert_eq!(mirror.entry_count(), 1);
    assert_eq!(mirror.used(), Fraction::of_whole(10));
    assert_eq!(mirror.remaining(), Fraction::of_whole(54));
}

#[test]
fn test_rolled_back_work_never_reaches_the_mirror() {
    let registry = InMemoryArticleRegistry::new();
    registry.register(&Article::item("coal"));

    let transactor = Transactor::new();
    let store = SlottedStore::new(4, 64);
    let (tx, rx) = crossbeam_channel::unbounded();
    let listener: Arc<dyn StoreListener> = Arc::new(ChannelListener::new(tx));
    store.start_listening(&listener, false);

    let mirror = StoreMirror::new();
    {
        let mut txn = transactor.open();
        store.accept(&mut txn, &Article::item("coal"), 30, false).unwrap();
        txn.rollback().unwrap();
    }

    // Forward + inverse events cancel: the mirror ends where it started.
    let message = updates_from_events(&rx);
    let bytes = message.encode(&registry).unwrap();
    mirror.apply(&SyncMessage::decode(&bytes, &registry).unwrap());
    assert_eq!(mirror.entry_count(), 0);
    assert!(mirror.used().is_zero());
}
