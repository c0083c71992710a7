//! # Slotted Store
//!
//! A fixed number of handles over discrete item counts, with a
//! storage-level capacity bound on the total. The workhorse for chest-like
//! containers.

use std::sync::Arc;

use crate::article::Article;
use crate::error::StockpileResult;
use crate::listener::StoreListener;
use crate::snapshot::StoreSnapshot;
use crate::store::slots::SlotCore;
use crate::store::{
    DiscreteFunction, FixedDiscreteFunction, StoreId, StoredArticleView,
};
use crate::transact::{DelegateId, Participant, RollbackFn, Transaction};

/// Fixed-handle discrete store.
///
/// The handle count never changes. Mutations enlist the store lazily in
/// the surrounding transaction: the slot table is deep-copied on the first
/// real write of each frame and swapped back wholesale on rollback.
pub struct SlottedStore {
    core: SlotCore,
}

impl std::fmt::Debug for SlottedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlottedStore").finish_non_exhaustive()
    }
}

impl SlottedStore {
    /// A store with `handles` fixed handles and a total capacity bound.
    #[must_use]
    pub fn new(handles: usize, capacity: u64) -> Self {
        Self {
            core: SlotCore::new(handles, false, capacity),
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

    /// True only when remaining capacity is exactly zero - a short accept
    /// does not imply fullness.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.core.is_full()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// Number of handles.
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

    /// A view of one handle, if in range.
    #[must_use]
    pub fn view_of(&self, handle: usize) -> Option<StoredArticleView> {
        self.core.view_of(handle)
    }

    /// Attaches a listener. When `send_notifications` is set, the new
    /// listener (alone) receives a capacity announcement and one synthetic
    /// accept per non-empty handle, reconstructing current state.
    pub fn start_listening(&self, listener: &Arc<dyn StoreListener>, send_notifications: bool) {
        self.core.start_listening(listener, send_notifications);
    }

    /// Detaches a listener. When `send_notifications` is set, the
    /// departing listener receives synthetic supply-to-zero events.
    pub fn stop_listening(&self, listener: &Arc<dyn StoreListener>, send_notifications: bool) {
        self.core.stop_listening(listener, send_notifications);
    }

    /// Empties every handle.
    ///
    /// # Errors
    ///
    /// Transaction misuse only.
    pub fn clear(&self, txn: &mut Transaction<'_>) -> StockpileResult<()> {
        self.core.clear(txn)
    }

    /// Changes the capacity bound. Does not evict: a store left over
    /// capacity simply accepts nothing until drained below the new bound.
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

    /// Clears, sets capacity, then replays each entry through the normal
    /// accept path - listeners and invariants are exercised exactly as in
    /// live mutation.
    ///
    /// # Errors
    ///
    /// [`crate::StockpileError::InvalidArgument`] for negative capacity or
    /// amounts, plus transaction misuse.
    pub fn load_snapshot(
        &self,
        txn: &mut Transaction<'_>,
        snapshot: &StoreSnapshot,
    ) -> StockpileResult<()> {
        self.core.load_snapshot(txn, snapshot)
    }
}

impl DiscreteFunction for SlottedStore {
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

impl FixedDiscreteFunction for SlottedStore {
    fn accept_into(
        &self,
        txn: &mut Transaction<'_>,
        handle: usize,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> StockpileResult<u64> {
        self.core.accept_into(txn, handle, article, count, simulate)
    }

    fn supply_from(
        &self,
        txn: &mut Transaction<'_>,
        handle: usize,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> StockpileResult<u64> {
        self.core.supply_from(txn, handle, article, count, simulate)
    }
}

impl Participant for SlottedStore {
    fn delegate_id(&self) -> DelegateId {
        self.core.delegate_id
    }

    fn prepare_rollback(&self) -> RollbackFn {
        self.core.prepare_rollback_now()
    }
}
