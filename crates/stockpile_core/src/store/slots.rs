//! Shared slot-table internals for the discrete stores.
//!
//! [`SlotArray`] is the authoritative state of a slotted or dynamic store:
//! the slot table, the storage-level capacity bound, and the running
//! total. Planning and applying are split so that simulated calls share
//! the exact code path that real calls take.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::article::Article;
use crate::fraction::Fraction;
use crate::listener::ListenerSet;
use crate::store::StoreId;
use crate::transact::RollbackFn;

/// Converts a discrete count to a whole-number fraction.
pub(crate) fn whole(count: u64) -> Fraction {
    Fraction::of_whole(i64::try_from(count).unwrap_or(i64::MAX))
}

/// Converts a signed discrete delta to a whole-number fraction.
pub(crate) fn whole_delta(delta: i64) -> Fraction {
    Fraction::of_whole(delta)
}

/// One slot: an article and how much of it. Empty slots hold
/// [`Article::nothing`] and a zero count - articles never coexist on one
/// handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Slot {
    pub article: Article,
    pub count: u64,
}

impl Slot {
    pub fn empty() -> Self {
        Self {
            article: Article::nothing(),
            count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// A content change at one handle, gathered under the data lock and
/// emitted after it is released.
#[derive(Clone, Debug)]
pub(crate) struct ChangeEvent {
    pub handle: usize,
    pub article: Article,
    pub delta: i64,
    pub new_count: u64,
}

impl ChangeEvent {
    pub fn emit(&self, listeners: &ListenerSet, store: StoreId) {
        listeners.notify_change(
            store,
            self.handle,
            &self.article,
            whole_delta(self.delta),
            whole(self.new_count),
        );
    }
}

/// Authoritative slot-table state.
#[derive(Clone, Debug)]
pub(crate) struct SlotArray {
    pub slots: Vec<Slot>,
    /// Fixed handle count, or the size a dynamic table compacts back to.
    pub base_handles: usize,
    /// Whether accept may append new handles past the current table.
    pub grows: bool,
    /// Storage-level bound on the total count.
    pub capacity: u64,
    /// Current total count across all slots.
    pub total: u64,
}

impl SlotArray {
    pub fn new(handles: usize, grows: bool, capacity: u64) -> Self {
        Self {
            slots: vec![Slot::empty(); handles],
            base_handles: handles,
            grows,
            capacity,
            total: 0,
        }
    }

    /// Remaining capacity, by subtraction. The store is full only when
    /// this is exactly zero.
    pub fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.total)
    }

    /// Plans a whole-store accept: matching slots first, then the first
    /// empty slot, then (if the table grows) a fresh handle. Returns the
    /// planned total and the per-handle additions.
    pub fn plan_accept(&self, article: &Article, count: u64) -> (u64, Vec<(usize, u64)>) {
        let budget = count.min(self.remaining());
        let mut left = budget;
        let mut plan = Vec::new();
        if left == 0 {
            return (0, plan);
        }
        // Capacity is a storage-level bound, so the first matching slot
        // absorbs the whole budget.
        for (handle, slot) in self.slots.iter().enumerate() {
            if !slot.is_empty() && slot.article == *article {
                plan.push((handle, left));
                left = 0;
                break;
            }
        }
        if left > 0 {
            if let Some(handle) = self.slots.iter().position(Slot::is_empty) {
                plan.push((handle, left));
                left = 0;
            } else if self.grows {
                plan.push((self.slots.len(), left));
                left = 0;
            }
        }
        (budget - left, plan)
    }

    /// Plans a whole-store supply, draining in handle-index order.
    pub fn plan_supply(&self, article: &Article, count: u64) -> (u64, Vec<(usize, u64)>) {
        let mut left = count;
        let mut plan = Vec::new();
        for (handle, slot) in self.slots.iter().enumerate() {
            if left == 0 {
                break;
            }
            if !slot.is_empty() && slot.article == *article {
                let take = slot.count.min(left);
                plan.push((handle, take));
                left -= take;
            }
        }
        (count - left, plan)
    }

    /// Applies a planned accept, returning the resulting change events.
    pub fn apply_accept(&mut self, article: &Article, plan: &[(usize, u64)]) -> Vec<ChangeEvent> {
        let mut events = Vec::with_capacity(plan.len());
        for &(handle, add) in plan {
            if handle == self.slots.len() {
                self.slots.push(Slot::empty());
            }
            let slot = &mut self.slots[handle];
            if slot.is_empty() {
                slot.article = article.clone();
            }
            slot.count += add;
            self.total += add;
            events.push(ChangeEvent {
                handle,
                article: article.clone(),
                delta: i64::try_from(add).unwrap_or(i64::MAX),
                new_count: slot.count,
            });
        }
        events
    }

    /// Applies a planned supply, returning the resulting change events.
    /// A slot drained to zero reverts to the empty state.
    pub fn apply_supply(&mut self, article: &Article, plan: &[(usize, u64)]) -> Vec<ChangeEvent> {
        let mut events = Vec::with_capacity(plan.len());
        for &(handle, take) in plan {
            let slot = &mut self.slots[handle];
            slot.count -= take;
            self.total -= take;
            if slot.count == 0 {
                slot.article = Article::nothing();
            }
            events.push(ChangeEvent {
                handle,
                article: article.clone(),
                delta: -i64::try_from(take).unwrap_or(i64::MAX),
                new_count: slot.count,
            });
        }
        events
    }

    /// Empties every slot, compacting a growing table back to its base
    /// size. Returns the supply-to-zero events.
    pub fn clear(&mut self) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        for (handle, slot) in self.slots.iter_mut().enumerate() {
            if !slot.is_empty() {
                events.push(ChangeEvent {
                    handle,
                    article: slot.article.clone(),
                    delta: -i64::try_from(slot.count).unwrap_or(i64::MAX),
                    new_count: 0,
                });
                *slot = Slot::empty();
            }
        }
        if self.grows {
            self.slots.truncate(self.base_handles);
        }
        self.total = 0;
        events
    }

    /// Per-handle events describing the change from `before` to `after`.
    /// Used on rollback so listeners observe the inverse of what they saw
    /// during the frame.
    pub fn diff(before: &Self, after: &Self) -> Vec<ChangeEvent> {
        let empty = Slot::empty();
        let handles = before.slots.len().max(after.slots.len());
        let mut events = Vec::new();
        for handle in 0..handles {
            let old = before.slots.get(handle).unwrap_or(&empty);
            let new = after.slots.get(handle).unwrap_or(&empty);
            if old.article == new.article {
                if old.count != new.count {
                    let delta = i64::try_from(new.count).unwrap_or(i64::MAX)
                        - i64::try_from(old.count).unwrap_or(i64::MAX);
                    events.push(ChangeEvent {
                        handle,
                        article: new.article.clone(),
                        delta,
                        new_count: new.count,
                    });
                }
            } else {
                if !old.is_empty() {
                    events.push(ChangeEvent {
                        handle,
                        article: old.article.clone(),
                        delta: -i64::try_from(old.count).unwrap_or(i64::MAX),
                        new_count: 0,
                    });
                }
                if !new.is_empty() {
                    events.push(ChangeEvent {
                        handle,
                        article: new.article.clone(),
                        delta: i64::try_from(new.count).unwrap_or(i64::MAX),
                        new_count: new.count,
                    });
                }
            }
        }
        events
    }
}

/// Builds the rollback closure for a slot-table store: the whole table was
/// deep-copied at first mutation; rolling back swaps it back in wholesale
/// and replays the per-handle inverse notifications. Memory traded for
/// simplicity - acceptable at the table sizes these stores run at.
pub(crate) fn restore_closure(
    inner: Arc<Mutex<SlotArray>>,
    listeners: Arc<ListenerSet>,
    store: StoreId,
    snapshot: SlotArray,
) -> RollbackFn {
    Box::new(move |committed| {
        if committed {
            return;
        }
        let (events, capacity) = {
            let mut inner = inner.lock();
            let current = std::mem::replace(&mut *inner, snapshot);
            let events = SlotArray::diff(&current, &inner);
            let capacity = (current.capacity != inner.capacity).then_some(inner.capacity);
            (events, capacity)
        };
        for event in &events {
            event.emit(&listeners, store);
        }
        if let Some(capacity) = capacity {
            listeners.notify_capacity(store, whole(capacity));
        }
    })
}

// =============================================================================
// SlotCore - Shared Store Behavior
// =============================================================================

/// The behavior shared by [`crate::store::SlottedStore`] and
/// [`crate::store::DynamicStore`]: the public stores are thin facades
/// composed over this by explicit delegation.
pub(crate) struct SlotCore {
    pub store_id: StoreId,
    pub delegate_id: crate::transact::DelegateId,
    pub inner: Arc<Mutex<SlotArray>>,
    pub listeners: Arc<ListenerSet>,
}

impl SlotCore {
    pub fn new(handles: usize, grows: bool, capacity: u64) -> Self {
        Self {
            store_id: StoreId::allocate(),
            delegate_id: crate::transact::DelegateId::allocate(),
            inner: Arc::new(Mutex::new(SlotArray::new(handles, grows, capacity))),
            listeners: Arc::new(ListenerSet::new()),
        }
    }

    /// Lazily enlists this store in the current frame, deep-copying the
    /// slot table as the rollback snapshot. Must run before the mutation
    /// it covers.
    fn enlist_in(
        &self,
        txn: &mut crate::transact::Transaction<'_>,
        inner: &SlotArray,
    ) -> crate::error::StockpileResult<()> {
        txn.enlist_with(self.delegate_id, || {
            restore_closure(
                Arc::clone(&self.inner),
                Arc::clone(&self.listeners),
                self.store_id,
                inner.clone(),
            )
        })
    }

    fn emit(&self, events: &[ChangeEvent]) {
        for event in events {
            event.emit(&self.listeners, self.store_id);
        }
    }

    pub fn accept(
        &self,
        txn: &mut crate::transact::Transaction<'_>,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> crate::error::StockpileResult<u64> {
        if article.is_nothing() || count == 0 {
            return Ok(0);
        }
        let mut inner = self.inner.lock();
        let (accepted, plan) = inner.plan_accept(article, count);
        if simulate || accepted == 0 {
            return Ok(accepted);
        }
        self.enlist_in(txn, &inner)?;
        let events = inner.apply_accept(article, &plan);
        drop(inner);
        self.emit(&events);
        Ok(accepted)
    }

    pub fn supply(
        &self,
        txn: &mut crate::transact::Transaction<'_>,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> crate::error::StockpileResult<u64> {
        if article.is_nothing() || count == 0 {
            return Ok(0);
        }
        let mut inner = self.inner.lock();
        let (supplied, plan) = inner.plan_supply(article, count);
        if simulate || supplied == 0 {
            return Ok(supplied);
        }
        self.enlist_in(txn, &inner)?;
        let events = inner.apply_supply(article, &plan);
        drop(inner);
        self.emit(&events);
        Ok(supplied)
    }

    pub fn accept_into(
        &self,
        txn: &mut crate::transact::Transaction<'_>,
        handle: usize,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> crate::error::StockpileResult<u64> {
        let mut inner = self.inner.lock();
        if handle >= inner.slots.len() {
            return Err(crate::error::StockpileError::invalid_argument(format!(
                "handle {handle} out of range (store has {})",
                inner.slots.len()
            )));
        }
        if article.is_nothing() || count == 0 {
            return Ok(0);
        }
        let slot = &inner.slots[handle];
        // A handle binds to one article at a time.
        if !slot.is_empty() && slot.article != *article {
            return Ok(0);
        }
        let take = count.min(inner.remaining());
        if simulate || take == 0 {
            return Ok(take);
        }
        self.enlist_in(txn, &inner)?;
        let events = inner.apply_accept(article, &[(handle, take)]);
        drop(inner);
        self.emit(&events);
        Ok(take)
    }

    pub fn supply_from(
        &self,
        txn: &mut crate::transact::Transaction<'_>,
        handle: usize,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> crate::error::StockpileResult<u64> {
        let mut inner = self.inner.lock();
        if handle >= inner.slots.len() {
            return Err(crate::error::StockpileError::invalid_argument(format!(
                "handle {handle} out of range (store has {})",
                inner.slots.len()
            )));
        }
        if article.is_nothing() || count == 0 {
            return Ok(0);
        }
        let slot = &inner.slots[handle];
        if slot.is_empty() || slot.article != *article {
            return Ok(0);
        }
        let give = count.min(slot.count);
        if simulate || give == 0 {
            return Ok(give);
        }
        self.enlist_in(txn, &inner)?;
        let events = inner.apply_supply(article, &[(handle, give)]);
        drop(inner);
        self.emit(&events);
        Ok(give)
    }

    pub fn clear(
        &self,
        txn: &mut crate::transact::Transaction<'_>,
    ) -> crate::error::StockpileResult<()> {
        let mut inner = self.inner.lock();
        if inner.total == 0 && inner.slots.len() == inner.base_handles {
            return Ok(());
        }
        self.enlist_in(txn, &inner)?;
        let events = inner.clear();
        drop(inner);
        self.emit(&events);
        Ok(())
    }

    pub fn set_capacity(
        &self,
        txn: &mut crate::transact::Transaction<'_>,
        capacity: u64,
    ) -> crate::error::StockpileResult<()> {
        let mut inner = self.inner.lock();
        if inner.capacity == capacity {
            return Ok(());
        }
        self.enlist_in(txn, &inner)?;
        inner.capacity = capacity;
        drop(inner);
        self.listeners.notify_capacity(self.store_id, whole(capacity));
        Ok(())
    }

    pub fn capacity(&self) -> u64 {
        self.inner.lock().capacity
    }

    pub fn total(&self) -> u64 {
        self.inner.lock().total
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().remaining() == 0
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().total == 0
    }

    pub fn handle_count(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn amount_of(&self, article: &Article) -> u64 {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|s| !s.is_empty() && s.article == *article)
            .map(|s| s.count)
            .sum()
    }

    pub fn view(&self) -> Vec<crate::store::StoredArticleView> {
        self.inner
            .lock()
            .slots
            .iter()
            .enumerate()
            .map(|(handle, slot)| crate::store::StoredArticleView {
                handle,
                article: slot.article.clone(),
                amount: whole(slot.count),
            })
            .collect()
    }

    pub fn view_of(&self, handle: usize) -> Option<crate::store::StoredArticleView> {
        self.inner
            .lock()
            .slots
            .get(handle)
            .map(|slot| crate::store::StoredArticleView {
                handle,
                article: slot.article.clone(),
                amount: whole(slot.count),
            })
    }

    pub fn start_listening(
        &self,
        listener: &Arc<dyn crate::listener::StoreListener>,
        send_notifications: bool,
    ) {
        self.listeners.attach(listener);
        if !send_notifications {
            return;
        }
        let (capacity, occupied) = self.occupied();
        listener.on_capacity(self.store_id, whole(capacity));
        for (handle, article, count) in occupied {
            listener.on_change(self.store_id, handle, &article, whole(count), whole(count));
        }
    }

    pub fn stop_listening(
        &self,
        listener: &Arc<dyn crate::listener::StoreListener>,
        send_notifications: bool,
    ) {
        if !self.listeners.detach(listener) || !send_notifications {
            return;
        }
        let (_, occupied) = self.occupied();
        for (handle, article, count) in occupied {
            listener.on_change(
                self.store_id,
                handle,
                &article,
                whole_delta(-i64::try_from(count).unwrap_or(i64::MAX)),
                Fraction::ZERO,
            );
        }
    }

    /// Capacity and the non-empty handles, copied out from under the lock.
    fn occupied(&self) -> (u64, Vec<(usize, Article, u64)>) {
        let inner = self.inner.lock();
        let occupied = inner
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_empty())
            .map(|(handle, slot)| (handle, slot.article.clone(), slot.count))
            .collect();
        (inner.capacity, occupied)
    }

    pub fn save_snapshot(&self) -> crate::snapshot::StoreSnapshot {
        let (capacity, occupied) = self.occupied();
        crate::snapshot::StoreSnapshot {
            capacity: whole(capacity),
            entries: occupied
                .into_iter()
                .map(|(_, article, count)| crate::snapshot::SnapshotEntry {
                    article: crate::snapshot::ArticleRecord::from(&article),
                    amount: whole(count),
                })
                .collect(),
        }
    }

    pub fn load_snapshot(
        &self,
        txn: &mut crate::transact::Transaction<'_>,
        snapshot: &crate::snapshot::StoreSnapshot,
    ) -> crate::error::StockpileResult<()> {
        self.clear(txn)?;
        let capacity = u64::try_from(snapshot.capacity.to_units(1)?).map_err(|_| {
            crate::error::StockpileError::invalid_argument("snapshot capacity is negative")
        })?;
        self.set_capacity(txn, capacity)?;
        for entry in &snapshot.entries {
            let article = entry.article.to_article();
            let count = u64::try_from(entry.amount.to_units(1)?).map_err(|_| {
                crate::error::StockpileError::invalid_argument("snapshot amount is negative")
            })?;
            self.accept(txn, &article, count, false)?;
        }
        Ok(())
    }

    pub fn prepare_rollback_now(&self) -> RollbackFn {
        let snapshot = self.inner.lock().clone();
        restore_closure(
            Arc::clone(&self.inner),
            Arc::clone(&self.listeners),
            self.store_id,
            snapshot,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_accept_prefers_matching_slot() {
        let mut array = SlotArray::new(3, false, 100);
        let coal = Article::item("coal");
        let plan = array.plan_accept(&coal, 10);
        array.apply_accept(&coal, &plan.1);
        // Occupy slot 0 with coal, slot 1 with iron.
        let iron = Article::item("iron");
        let plan = array.plan_accept(&iron, 5);
        array.apply_accept(&iron, &plan.1);

        let (accepted, plan) = array.plan_accept(&coal, 7);
        assert_eq!(accepted, 7);
        assert_eq!(plan, vec![(0, 7)]);
    }

    #[test]
    fn test_plan_accept_claims_first_empty() {
        let array = SlotArray::new(3, false, 100);
        let (accepted, plan) = array.plan_accept(&Article::item("coal"), 10);
        assert_eq!(accepted, 10);
        assert_eq!(plan, vec![(0, 10)]);
    }

    #[test]
    fn test_plan_accept_clamps_to_remaining() {
        let mut array = SlotArray::new(2, false, 64);
        let coal = Article::item("coal");
        let plan = array.plan_accept(&coal, 40);
        array.apply_accept(&coal, &plan.1);
        let (accepted, _) = array.plan_accept(&coal, 40);
        assert_eq!(accepted, 24);
    }

    #[test]
    fn test_supply_drains_in_handle_order() {
        let mut array = SlotArray::new(3, false, 100);
        let coal = Article::item("coal");
        // Force two separate coal slots by hand.
        array.slots[0] = Slot {
            article: coal.clone(),
            count: 5,
        };
        array.slots[2] = Slot {
            article: coal.clone(),
            count: 5,
        };
        array.total = 10;

        let (supplied, plan) = array.plan_supply(&coal, 8);
        assert_eq!(supplied, 8);
        assert_eq!(plan, vec![(0, 5), (2, 3)]);
        let events = array.apply_supply(&coal, &plan);
        assert_eq!(events.len(), 2);
        assert!(array.slots[0].is_empty());
        assert_eq!(array.slots[2].count, 2);
    }

    #[test]
    fn test_growth_appends_handle() {
        let mut array = SlotArray::new(1, true, 100);
        let coal = Article::item("coal");
        let plan = array.plan_accept(&coal, 10);
        array.apply_accept(&coal, &plan.1);
        let iron = Article::item("iron");
        let (accepted, plan) = array.plan_accept(&iron, 5);
        assert_eq!(accepted, 5);
        assert_eq!(plan, vec![(1, 5)]);
        array.apply_accept(&iron, &plan);
        assert_eq!(array.slots.len(), 2);
    }

    #[test]
    fn test_clear_compacts_growing_table() {
        let mut array = SlotArray::new(1, true, 100);
        for name in ["a", "b", "c"] {
            let article = Article::item(name);
            let plan = array.plan_accept(&article, 1);
            array.apply_accept(&article, &plan.1);
        }
        assert_eq!(array.slots.len(), 3);
        let events = array.clear();
        assert_eq!(events.len(), 3);
        assert_eq!(array.slots.len(), 1);
        assert_eq!(array.total, 0);
    }

    #[test]
    fn test_diff_reports_article_swap_as_two_events() {
        let mut before = SlotArray::new(1, false, 100);
        before.slots[0] = Slot {
            article: Article::item("coal"),
            count: 4,
        };
        let mut after = SlotArray::new(1, false, 100);
        after.slots[0] = Slot {
            article: Article::item("iron"),
            count: 2,
        };
        let events = SlotArray::diff(&before, &after);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].delta, -4);
        assert_eq!(events[0].new_count, 0);
        assert_eq!(events[1].delta, 2);
        assert_eq!(events[1].new_count, 2);
    }
}
