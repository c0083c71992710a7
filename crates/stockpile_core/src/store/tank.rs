//! # Tank
//!
//! A single-handle bulk store: one article, one fractional content value,
//! one fractional capacity. The shape of fluid containers.
//!
//! Rollback here is the full-snapshot flavor: the tank captures
//! `(article, content)` on its first mutation in a frame and, on
//! rollback, re-applies the difference with the matching notifications so
//! listeners observe the inverse of what they saw during the frame.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::article::Article;
use crate::error::{StockpileError, StockpileResult};
use crate::fraction::{Fraction, MutableFraction};
use crate::listener::{ListenerSet, StoreListener};
use crate::snapshot::{ArticleRecord, SnapshotEntry, StoreSnapshot};
use crate::store::{BulkFunction, FixedBulkFunction, StoreId, StoredArticleView};
use crate::transact::{DelegateId, Participant, RollbackFn, Transaction};

/// The tank's single handle.
const TANK_HANDLE: usize = 0;

struct TankInner {
    article: Article,
    content: MutableFraction,
    capacity: Fraction,
}

/// Single-handle bulk fractional store.
pub struct Tank {
    store_id: StoreId,
    delegate_id: DelegateId,
    inner: Arc<Mutex<TankInner>>,
    listeners: Arc<ListenerSet>,
}

impl std::fmt::Debug for Tank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tank").finish_non_exhaustive()
    }
}

impl Tank {
    /// An empty tank with the given capacity. Pass [`Fraction::MAX`] for
    /// an unbounded tank.
    #[must_use]
    pub fn new(capacity: Fraction) -> Self {
        Self {
            store_id: StoreId::allocate(),
            delegate_id: DelegateId::allocate(),
            inner: Arc::new(Mutex::new(TankInner {
                article: Article::nothing(),
                content: MutableFraction::new(),
                capacity,
            })),
            listeners: Arc::new(ListenerSet::new()),
        }
    }

    /// This store's listener-event identity.
    #[inline]
    #[must_use]
    pub const fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// The capacity bound.
    #[must_use]
    pub fn capacity(&self) -> Fraction {
        self.inner.lock().capacity
    }

    /// Current content amount.
    #[must_use]
    pub fn content(&self) -> Fraction {
        self.inner.lock().content.snapshot()
    }

    /// The stored article, [`Article::nothing`] when empty.
    #[must_use]
    pub fn article(&self) -> Article {
        self.inner.lock().article.clone()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().content.is_zero()
    }

    /// True only when remaining capacity is exactly zero. An unbounded
    /// tank is never full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock();
        !inner.capacity.is_max()
            && inner
                .capacity
                .subtract(inner.content.snapshot())
                .is_zero()
    }

    /// The single handle's view.
    #[must_use]
    pub fn view(&self) -> StoredArticleView {
        let inner = self.inner.lock();
        StoredArticleView {
            handle: TANK_HANDLE,
            article: inner.article.clone(),
            amount: inner.content.snapshot(),
        }
    }

    /// Attaches a listener, optionally replaying current state to it.
    pub fn start_listening(&self, listener: &Arc<dyn StoreListener>, send_notifications: bool) {
        self.listeners.attach(listener);
        if !send_notifications {
            return;
        }
        let (article, amount, capacity) = self.state();
        listener.on_capacity(self.store_id, capacity);
        if !amount.is_zero() {
            listener.on_change(self.store_id, TANK_HANDLE, &article, amount, amount);
        }
    }

    /// Detaches a listener, optionally replaying a supply-to-zero event.
    pub fn stop_listening(&self, listener: &Arc<dyn StoreListener>, send_notifications: bool) {
        if !self.listeners.detach(listener) || !send_notifications {
            return;
        }
        let (article, amount, _) = self.state();
        if !amount.is_zero() {
            listener.on_change(
                self.store_id,
                TANK_HANDLE,
                &article,
                amount.negate(),
                Fraction::ZERO,
            );
        }
    }

    fn state(&self) -> (Article, Fraction, Fraction) {
        let inner = self.inner.lock();
        (
            inner.article.clone(),
            inner.content.snapshot(),
            inner.capacity,
        )
    }

    /// Unit-granular accept: up to `count` units of size `1/divisor`.
    /// Remaining capacity is rounded down to the divisor before clamping.
    ///
    /// # Errors
    ///
    /// [`StockpileError::InvalidArgument`] for a bad divisor or an
    /// unrepresentable count, plus transaction misuse.
    pub fn accept_units(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        count: u64,
        divisor: i64,
        simulate: bool,
    ) -> StockpileResult<u64> {
        let count = i64::try_from(count)
            .map_err(|_| StockpileError::invalid_argument("unit count too large"))?;
        let requested = Fraction::new(count, divisor)?; // validates the divisor
        if article.is_nothing() || count == 0 {
            return Ok(0);
        }
        let mut inner = self.inner.lock();
        if !inner.content.is_zero() && inner.article != *article {
            return Ok(0);
        }
        let remaining = if inner.capacity.is_max() {
            requested
        } else {
            inner.capacity.subtract(inner.content.snapshot())
        };
        let room = remaining.to_units(divisor)?.max(0);
        let accepted = count.min(room);
        if simulate || accepted == 0 {
            return Ok(unsigned(accepted));
        }
        self.enlist_in(txn, &inner)?;
        inner.article = article.clone();
        inner.content.add_units(accepted, divisor);
        let new_amount = inner.content.snapshot();
        drop(inner);
        self.listeners.notify_change(
            self.store_id,
            TANK_HANDLE,
            article,
            Fraction::new(accepted, divisor)?,
            new_amount,
        );
        Ok(unsigned(accepted))
    }

    /// Unit-granular supply: up to `count` units of size `1/divisor`,
    /// truncating the stored amount to the divisor first - at most what is
    /// exactly available at that granularity.
    ///
    /// # Errors
    ///
    /// As for [`Tank::accept_units`].
    pub fn supply_units(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        count: u64,
        divisor: i64,
        simulate: bool,
    ) -> StockpileResult<u64> {
        let count = i64::try_from(count)
            .map_err(|_| StockpileError::invalid_argument("unit count too large"))?;
        Fraction::new(count, divisor)?; // validates the divisor
        if article.is_nothing() || count == 0 {
            return Ok(0);
        }
        let mut inner = self.inner.lock();
        if inner.content.is_zero() || inner.article != *article {
            return Ok(0);
        }
        let available = inner.content.to_units(divisor)?;
        let supplied = count.min(available);
        if simulate || supplied == 0 {
            return Ok(unsigned(supplied));
        }
        self.enlist_in(txn, &inner)?;
        inner.content.subtract_units(supplied, divisor);
        if inner.content.is_zero() {
            inner.article = Article::nothing();
        }
        let new_amount = inner.content.snapshot();
        drop(inner);
        self.listeners.notify_change(
            self.store_id,
            TANK_HANDLE,
            article,
            Fraction::new(supplied, divisor)?.negate(),
            new_amount,
        );
        Ok(unsigned(supplied))
    }

    /// Changes the capacity bound. Does not evict.
    ///
    /// # Errors
    ///
    /// [`StockpileError::InvalidArgument`] for a negative capacity, plus
    /// transaction misuse.
    pub fn set_capacity(&self, txn: &mut Transaction<'_>, capacity: Fraction) -> StockpileResult<()> {
        if capacity.is_negative() {
            return Err(StockpileError::invalid_argument("capacity is negative"));
        }
        let mut inner = self.inner.lock();
        if inner.capacity == capacity {
            return Ok(());
        }
        self.enlist_in(txn, &inner)?;
        inner.capacity = capacity;
        drop(inner);
        self.listeners.notify_capacity(self.store_id, capacity);
        Ok(())
    }

    /// Drains the tank to empty.
    ///
    /// # Errors
    ///
    /// Transaction misuse only.
    pub fn clear(&self, txn: &mut Transaction<'_>) -> StockpileResult<()> {
        let mut inner = self.inner.lock();
        if inner.content.is_zero() {
            return Ok(());
        }
        self.enlist_in(txn, &inner)?;
        let article = std::mem::replace(&mut inner.article, Article::nothing());
        let drained = inner.content.snapshot();
        inner.content.set(Fraction::ZERO);
        drop(inner);
        self.listeners.notify_change(
            self.store_id,
            TANK_HANDLE,
            &article,
            drained.negate(),
            Fraction::ZERO,
        );
        Ok(())
    }

    /// Captures capacity and content as a persistable record.
    #[must_use]
    pub fn save_snapshot(&self) -> StoreSnapshot {
        let (article, amount, capacity) = self.state();
        let entries = if amount.is_zero() {
            Vec::new()
        } else {
            vec![SnapshotEntry {
                article: ArticleRecord::from(&article),
                amount,
            }]
        };
        StoreSnapshot { capacity, entries }
    }

    /// Clears, sets capacity, then replays entries through normal accept.
    ///
    /// # Errors
    ///
    /// [`StockpileError::InvalidArgument`] for malformed entries, plus
    /// transaction misuse.
    pub fn load_snapshot(
        &self,
        txn: &mut Transaction<'_>,
        snapshot: &StoreSnapshot,
    ) -> StockpileResult<()> {
        self.clear(txn)?;
        self.set_capacity(txn, snapshot.capacity)?;
        for entry in &snapshot.entries {
            let article = entry.article.to_article();
            BulkFunction::accept(self, txn, &article, entry.amount, false)?;
        }
        Ok(())
    }

    /// Lazily enlists the tank, capturing `(article, content)`.
    fn enlist_in(&self, txn: &mut Transaction<'_>, inner: &TankInner) -> StockpileResult<()> {
        txn.enlist_with(self.delegate_id, || {
            restore_closure(
                Arc::clone(&self.inner),
                Arc::clone(&self.listeners),
                self.store_id,
                inner.article.clone(),
                inner.content.snapshot(),
            )
        })
    }
}

/// Saturating conversion for unit counts already known non-negative.
fn unsigned(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

/// Builds the tank's rollback closure: restore `(article, amount)` and
/// notify the difference so listeners see the inverse sequence.
fn restore_closure(
    inner: Arc<Mutex<TankInner>>,
    listeners: Arc<ListenerSet>,
    store: StoreId,
    article: Article,
    amount: Fraction,
) -> RollbackFn {
    Box::new(move |committed| {
        if committed {
            return;
        }
        let mut events: Vec<(Article, Fraction, Fraction)> = Vec::new();
        {
            let mut inner = inner.lock();
            let current = inner.content.snapshot();
            let current_article = inner.article.clone();
            let same_article = current_article == article;
            if !current.is_zero() && (!same_article || amount.is_zero()) {
                // The frame changed what is stored: drain it first.
                inner.content.set(Fraction::ZERO);
                inner.article = Article::nothing();
                events.push((current_article, current.negate(), Fraction::ZERO));
            }
            if !amount.is_zero() {
                let now = inner.content.snapshot();
                let delta = amount.subtract(now);
                if !delta.is_zero() {
                    inner.content.set(amount);
                    inner.article = article.clone();
                    events.push((article.clone(), delta, amount));
                }
            }
        }
        for (article, delta, new_amount) in events {
            listeners.notify_change(store, TANK_HANDLE, &article, delta, new_amount);
        }
    })
}

impl BulkFunction for Tank {
    fn accept(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        amount: Fraction,
        simulate: bool,
    ) -> StockpileResult<Fraction> {
        if amount.is_negative() {
            return Err(StockpileError::invalid_argument("accept amount is negative"));
        }
        if article.is_nothing() || amount.is_zero() {
            return Ok(Fraction::ZERO);
        }
        let mut inner = self.inner.lock();
        if !inner.content.is_zero() && inner.article != *article {
            return Ok(Fraction::ZERO);
        }
        let remaining = if inner.capacity.is_max() {
            amount
        } else {
            inner.capacity.subtract(inner.content.snapshot())
        };
        if remaining.is_negative() || remaining.is_zero() {
            return Ok(Fraction::ZERO);
        }
        let accepted = amount.min(remaining);
        if simulate {
            return Ok(accepted);
        }
        self.enlist_in(txn, &inner)?;
        inner.article = article.clone();
        inner.content.add(accepted);
        let new_amount = inner.content.snapshot();
        drop(inner);
        self.listeners
            .notify_change(self.store_id, TANK_HANDLE, article, accepted, new_amount);
        Ok(accepted)
    }

    fn supply(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        amount: Fraction,
        simulate: bool,
    ) -> StockpileResult<Fraction> {
        if amount.is_negative() {
            return Err(StockpileError::invalid_argument("supply amount is negative"));
        }
        if article.is_nothing() || amount.is_zero() {
            return Ok(Fraction::ZERO);
        }
        let mut inner = self.inner.lock();
        if inner.content.is_zero() || inner.article != *article {
            return Ok(Fraction::ZERO);
        }
        let supplied = amount.min(inner.content.snapshot());
        if simulate {
            return Ok(supplied);
        }
        self.enlist_in(txn, &inner)?;
        inner.content.subtract(supplied);
        if inner.content.is_zero() {
            inner.article = Article::nothing();
        }
        let new_amount = inner.content.snapshot();
        drop(inner);
        self.listeners.notify_change(
            self.store_id,
            TANK_HANDLE,
            article,
            supplied.negate(),
            new_amount,
        );
        Ok(supplied)
    }
}

impl FixedBulkFunction for Tank {
    fn accept_into(
        &self,
        txn: &mut Transaction<'_>,
        handle: usize,
        article: &Article,
        amount: Fraction,
        simulate: bool,
    ) -> StockpileResult<Fraction> {
        check_handle(handle)?;
        BulkFunction::accept(self, txn, article, amount, simulate)
    }

    fn supply_from(
        &self,
        txn: &mut Transaction<'_>,
        handle: usize,
        article: &Article,
        amount: Fraction,
        simulate: bool,
    ) -> StockpileResult<Fraction> {
        check_handle(handle)?;
        BulkFunction::supply(self, txn, article, amount, simulate)
    }
}

fn check_handle(handle: usize) -> StockpileResult<()> {
    if handle == TANK_HANDLE {
        Ok(())
    } else {
        Err(StockpileError::invalid_argument(format!(
            "handle {handle} out of range (tank has one handle)"
        )))
    }
}

impl Participant for Tank {
    fn delegate_id(&self) -> DelegateId {
        self.delegate_id
    }

    fn prepare_rollback(&self) -> RollbackFn {
        let (article, amount, _) = self.state();
        restore_closure(
            Arc::clone(&self.inner),
            Arc::clone(&self.listeners),
            self.store_id,
            article,
            amount,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transact::Transactor;

    fn water() -> Article {
        Article::fluid("water")
    }

    fn lava() -> Article {
        Article::fluid("lava")
    }

    fn frac(n: i64, d: i64) -> Fraction {
        Fraction::new(n, d).unwrap()
    }

    #[test]
    fn test_accept_clamps_to_capacity() {
        let transactor = Transactor::new();
        let tank = Tank::new(Fraction::of_whole(4));
        let mut txn = transactor.open();

        let first = BulkFunction::accept(&tank, &mut txn, &water(), frac(7, 2), false).unwrap();
        assert_eq!(first, frac(7, 2));
        let second = BulkFunction::accept(&tank, &mut txn, &water(), Fraction::ONE, false).unwrap();
        assert_eq!(second, frac(1, 2));
        assert!(tank.is_full());
        txn.commit().unwrap();
    }

    #[test]
    fn test_mismatched_article_is_rejected() {
        let transactor = Transactor::new();
        let tank = Tank::new(Fraction::of_whole(4));
        let mut txn = transactor.open();
        BulkFunction::accept(&tank, &mut txn, &water(), Fraction::ONE, false).unwrap();
        let refused = BulkFunction::accept(&tank, &mut txn, &lava(), Fraction::ONE, false).unwrap();
        assert!(refused.is_zero());
        txn.commit().unwrap();
    }

    #[test]
    fn test_supply_to_empty_resets_article() {
        let transactor = Transactor::new();
        let tank = Tank::new(Fraction::of_whole(4));
        let mut txn = transactor.open();
        BulkFunction::accept(&tank, &mut txn, &water(), Fraction::ONE, false).unwrap();
        let out =
            BulkFunction::supply(&tank, &mut txn, &water(), Fraction::of_whole(10), false).unwrap();
        assert_eq!(out, Fraction::ONE);
        assert!(tank.article().is_nothing());
        txn.commit().unwrap();
    }

    #[test]
    fn test_negative_amount_is_invalid_argument() {
        let transactor = Transactor::new();
        let tank = Tank::new(Fraction::of_whole(4));
        let mut txn = transactor.open();
        let err = BulkFunction::accept(&tank, &mut txn, &water(), frac(-1, 2), false).unwrap_err();
        assert!(matches!(err, StockpileError::InvalidArgument { .. }));
        txn.commit().unwrap();
    }

    #[test]
    fn test_unit_ops_round_down_to_granularity() {
        let transactor = Transactor::new();
        let tank = Tank::new(frac(5, 2)); // capacity 2.5
        let mut txn = transactor.open();

        // Room for 2.5 = 7/3 rounded down at thirds: 7 units.
        let taken = tank.accept_units(&mut txn, &water(), 100, 3, false).unwrap();
        assert_eq!(taken, 7);
        assert_eq!(tank.content(), frac(7, 3));

        let back = tank.supply_units(&mut txn, &water(), 100, 3, false).unwrap();
        assert_eq!(back, 7);
        assert!(tank.is_empty());
        txn.commit().unwrap();
    }

    #[test]
    fn test_unbounded_tank_accepts_everything() {
        let transactor = Transactor::new();
        let tank = Tank::new(Fraction::MAX);
        let mut txn = transactor.open();
        let huge = Fraction::of_whole(1_000_000);
        assert_eq!(
            BulkFunction::accept(&tank, &mut txn, &water(), huge, false).unwrap(),
            huge
        );
        assert!(!tank.is_full());
        txn.commit().unwrap();
    }

    #[test]
    fn test_rollback_restores_article_and_amount() {
        let transactor = Transactor::new();
        let tank = Tank::new(Fraction::of_whole(10));
        {
            let mut txn = transactor.open();
            BulkFunction::accept(&tank, &mut txn, &water(), Fraction::ONE, false).unwrap();
            txn.commit().unwrap();
        }
        {
            let mut txn = transactor.open();
            BulkFunction::supply(&tank, &mut txn, &water(), Fraction::ONE, false).unwrap();
            BulkFunction::accept(&tank, &mut txn, &lava(), frac(3, 2), false).unwrap();
            assert_eq!(tank.article(), lava());
            txn.rollback().unwrap();
        }
        assert_eq!(tank.article(), water());
        assert_eq!(tank.content(), Fraction::ONE);
    }

    #[test]
    fn test_fixed_handle_must_be_zero() {
        let transactor = Transactor::new();
        let tank = Tank::new(Fraction::of_whole(4));
        let mut txn = transactor.open();
        assert!(
            FixedBulkFunction::accept_into(&tank, &mut txn, 1, &water(), Fraction::ONE, false)
                .is_err()
        );
        assert_eq!(
            FixedBulkFunction::accept_into(&tank, &mut txn, 0, &water(), Fraction::ONE, false)
                .unwrap(),
            Fraction::ONE
        );
        txn.commit().unwrap();
    }
}
