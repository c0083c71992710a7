//! # Dynamic Store
//!
//! Find-or-allocate discrete storage. Accept prefers an existing matching
//! handle, then the lowest-index empty handle, then appends a fresh one;
//! the handle table grows monotonically and compacts back to its starting
//! size only on [`DynamicStore::clear`].

use std::sync::Arc;

use crate::article::Article;
use crate::error::StockpileResult;
use crate::listener::StoreListener;
use crate::snapshot::StoreSnapshot;
use crate::store::slots::SlotCore;
use crate::store::{DiscreteFunction, StoreId, StoredArticleView};
use crate::transact::{DelegateId, Participant, RollbackFn, Transaction};

/// Growing discrete store.
pub struct DynamicStore {
    core: SlotCore,
}

impl std::fmt::Debug for DynamicStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicStore").finish_non_exhaustive()
    }
}

impl DynamicStore {
    /// A store starting at `initial_handles` handles with a total
    /// capacity bound.
    #[must_use]
    pub fn new(initial_handles: usize, capacity: u64) -> Self {
        Self {
            core: SlotCore::new(initial_handles, true, capacity),
        }
    }

    /// This store's listener-event identity.
    #[inline]
    #[must_use]
    pub const fn store_id(&self) -> StoreId {
        self.core.store_id
    }

    /// The storage-level capacity bound.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.core.capacity()
    }

    /// Total count across all handles.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.core.total()
    }

    /// True only when remaining capacity is exactly zero.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.core.is_full()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// Current handle count. Grows as articles are accepted; shrinks only
    /// on [`DynamicStore::clear`].
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.core.handle_count()
    }

    /// Total stored count of one article.
    #[must_use]
    pub fn amount_of(&self, article: &Article) -> u64 {
        self.core.amount_of(article)
    }

    /// A view of every handle, in handle order.
    #[must_use]
    pub fn view(&self) -> Vec<StoredArticleView> {
        self.core.view()
    }

    /// Attaches a listener, optionally replaying current state to it.
    pub fn start_listening(&self, listener: &Arc<dyn StoreListener>, send_notifications: bool) {
        self.core.start_listening(listener, send_notifications);
    }

    /// Detaches a listener, optionally replaying supply-to-zero events.
    pub fn stop_listening(&self, listener: &Arc<dyn StoreListener>, send_notifications: bool) {
        self.core.stop_listening(listener, send_notifications);
    }

    /// Empties every handle and compacts the table to its starting size.
    ///
    /// # Errors
    ///
    /// Transaction misuse only.
    pub fn clear(&self, txn: &mut Transaction<'_>) -> StockpileResult<()> {
        self.core.clear(txn)
    }

    /// Changes the capacity bound.
    ///
    /// # Errors
    ///
    /// Transaction misuse only.
    pub fn set_capacity(&self, txn: &mut Transaction<'_>, capacity: u64) -> StockpileResult<()> {
        self.core.set_capacity(txn, capacity)
    }

    /// Captures capacity and contents as a persistable record.
    #[must_use]
    pub fn save_snapshot(&self) -> StoreSnapshot {
        self.core.save_snapshot()
    }

    /// Clears, sets capacity, then replays entries through normal accept.
    ///
    /// # Errors
    ///
    /// As for [`crate::store::SlottedStore::load_snapshot`].
    pub fn load_snapshot(
        &self,
        txn: &mut Transaction<'_>,
        snapshot: &StoreSnapshot,
    ) -> StockpileResult<()> {
        self.core.load_snapshot(txn, snapshot)
    }
}

impl DiscreteFunction for DynamicStore {
    fn accept(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> StockpileResult<u64> {
        self.core.accept(txn, article, count, simulate)
    }

    fn supply(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> StockpileResult<u64> {
        self.core.supply(txn, article, count, simulate)
    }
}

impl Participant for DynamicStore {
    fn delegate_id(&self) -> DelegateId {
        self.core.delegate_id
    }

    fn prepare_rollback(&self) -> RollbackFn {
        self.core.prepare_rollback_now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transact::Transactor;

    #[test]
    fn test_handles_grow_and_compact_on_clear() {
        let transactor = Transactor::new();
        let store = DynamicStore::new(1, 100);
        let mut txn = transactor.open();

        store.accept(&mut txn, &Article::item("a"), 1, false).unwrap();
        store.accept(&mut txn, &Article::item("b"), 1, false).unwrap();
        store.accept(&mut txn, &Article::item("c"), 1, false).unwrap();
        assert_eq!(store.handle_count(), 3);

        store.clear(&mut txn).unwrap();
        assert_eq!(store.handle_count(), 1);
        assert!(store.is_empty());
        txn.commit().unwrap();
    }

    #[test]
    fn test_accept_reuses_matching_handle() {
        let transactor = Transactor::new();
        let store = DynamicStore::new(1, 100);
        let mut txn = transactor.open();

        store.accept(&mut txn, &Article::item("a"), 3, false).unwrap();
        store.accept(&mut txn, &Article::item("b"), 3, false).unwrap();
        store.accept(&mut txn, &Article::item("a"), 3, false).unwrap();
        // "a" stacked onto handle 0 rather than claiming a third handle.
        assert_eq!(store.handle_count(), 2);
        assert_eq!(store.amount_of(&Article::item("a")), 6);
        txn.commit().unwrap();
    }

    #[test]
    fn test_supplied_handle_is_reclaimed_before_growth() {
        let transactor = Transactor::new();
        let store = DynamicStore::new(1, 100);
        let mut txn = transactor.open();

        store.accept(&mut txn, &Article::item("a"), 2, false).unwrap();
        store.accept(&mut txn, &Article::item("b"), 2, false).unwrap();
        store.supply(&mut txn, &Article::item("a"), 2, false).unwrap();
        // Handle 0 is empty again; "c" claims it instead of growing.
        store.accept(&mut txn, &Article::item("c"), 1, false).unwrap();
        assert_eq!(store.handle_count(), 2);
        assert_eq!(store.view()[0].article, Article::item("c"));
        txn.commit().unwrap();
    }

    #[test]
    fn test_rollback_restores_table_shape() {
        let transactor = Transactor::new();
        let store = DynamicStore::new(1, 100);
        {
            let mut txn = transactor.open();
            store.accept(&mut txn, &Article::item("a"), 2, false).unwrap();
            txn.commit().unwrap();
        }
        {
            let mut txn = transactor.open();
            store.accept(&mut txn, &Article::item("b"), 2, false).unwrap();
            assert_eq!(store.handle_count(), 2);
            txn.rollback().unwrap();
        }
        assert_eq!(store.handle_count(), 1);
        assert_eq!(store.amount_of(&Article::item("a")), 2);
        assert_eq!(store.amount_of(&Article::item("b")), 0);
    }
}
