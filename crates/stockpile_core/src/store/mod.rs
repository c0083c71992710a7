//! # Stores
//!
//! Capacity-constrained containers of (article, quantity) pairs, addressed
//! by stable integer handles.
//!
//! Three concrete stores cover the closed set of storage shapes:
//!
//! - [`SlottedStore`]: fixed handle count, discrete counts.
//! - [`DynamicStore`]: find-or-allocate handles that grow monotonically,
//!   compacting on clear. Discrete counts.
//! - [`Tank`]: one handle of bulk fractional content.
//!
//! The accept/supply protocol comes in four trait flavors (discrete or
//! bulk, whole-store or fixed-handle), composed by delegation rather than
//! inheritance. Every operation takes the transaction it runs under and a
//! `simulate` flag; a simulated call returns exactly what the real call
//! would, while leaving state, listeners, and enlistment untouched.
//!
//! Shortfalls are partial success, not errors: `accept` returns how much
//! was actually taken in, `supply` how much was actually handed out, and
//! callers check the returned quantity.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::article::Article;
use crate::error::StockpileResult;
use crate::fraction::Fraction;
use crate::transact::Transaction;

mod dynamic;
mod slots;
mod slotted;
mod tank;

pub use dynamic::DynamicStore;
pub use slotted::SlottedStore;
pub use tank::Tank;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a store, carried on every listener event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl StoreId {
    /// Allocates a process-unique id.
    #[must_use]
    pub fn allocate() -> Self {
        Self(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// One handle's visible state: what is stored there and how much.
///
/// Empty handles report [`Article::nothing`] and a zero amount. Discrete
/// stores report whole-number fractions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredArticleView {
    /// The handle this view describes.
    pub handle: usize,
    /// The article stored there.
    pub article: Article,
    /// The stored amount.
    pub amount: Fraction,
}

/// Whole-store accept/supply over discrete counts.
pub trait DiscreteFunction {
    /// Adds up to `count` of `article`, filling already-matching handles
    /// before claiming empty ones, first-fit in handle-index order.
    /// Returns how much was actually accepted.
    ///
    /// # Errors
    ///
    /// Transaction misuse only ([`crate::StockpileError::IllegalState`],
    /// [`crate::StockpileError::OutOfOrder`],
    /// [`crate::StockpileError::ConcurrentAccess`]). A full store is not an
    /// error: the returned count is simply short.
    fn accept(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> StockpileResult<u64>;

    /// Removes up to `count` of `article`, draining in handle-index order.
    /// Returns how much was actually supplied; zero if the article is not
    /// stored.
    ///
    /// # Errors
    ///
    /// Transaction misuse only, as for [`DiscreteFunction::accept`].
    fn supply(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> StockpileResult<u64>;
}

/// Whole-store accept/supply over bulk fractional amounts.
pub trait BulkFunction {
    /// Adds up to `amount` of `article`. Returns how much was actually
    /// accepted.
    ///
    /// # Errors
    ///
    /// [`crate::StockpileError::InvalidArgument`] for a negative amount,
    /// plus transaction misuse as for [`DiscreteFunction::accept`].
    fn accept(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        amount: Fraction,
        simulate: bool,
    ) -> StockpileResult<Fraction>;

    /// Removes up to `amount` of `article`. Returns how much was actually
    /// supplied.
    ///
    /// # Errors
    ///
    /// As for [`BulkFunction::accept`].
    fn supply(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        amount: Fraction,
        simulate: bool,
    ) -> StockpileResult<Fraction>;
}

/// Fixed-handle accept/supply over discrete counts.
///
/// A handle binds to one article at a time: the first successful accept on
/// an empty handle claims it, and a handle occupied by a different article
/// rejects (returns zero) rather than mixing.
pub trait FixedDiscreteFunction {
    /// Adds up to `count` of `article` into one handle.
    ///
    /// # Errors
    ///
    /// [`crate::StockpileError::InvalidArgument`] for an out-of-range
    /// handle, plus transaction misuse as for
    /// [`DiscreteFunction::accept`].
    fn accept_into(
        &self,
        txn: &mut Transaction<'_>,
        handle: usize,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> StockpileResult<u64>;

    /// Removes up to `count` of `article` from one handle.
    ///
    /// # Errors
    ///
    /// As for [`FixedDiscreteFunction::accept_into`].
    fn supply_from(
        &self,
        txn: &mut Transaction<'_>,
        handle: usize,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> StockpileResult<u64>;
}

/// Fixed-handle accept/supply over bulk fractional amounts.
pub trait FixedBulkFunction {
    /// Adds up to `amount` of `article` into one handle.
    ///
    /// # Errors
    ///
    /// As for [`FixedDiscreteFunction::accept_into`], plus a negative
    /// amount being [`crate::StockpileError::InvalidArgument`].
    fn accept_into(
        &self,
        txn: &mut Transaction<'_>,
        handle: usize,
        article: &Article,
        amount: Fraction,
        simulate: bool,
    ) -> StockpileResult<Fraction>;

    /// Removes up to `amount` of `article` from one handle.
    ///
    /// # Errors
    ///
    /// As for [`FixedBulkFunction::accept_into`].
    fn supply_from(
        &self,
        txn: &mut Transaction<'_>,
        handle: usize,
        article: &Article,
        amount: Fraction,
        simulate: bool,
    ) -> StockpileResult<Fraction>;
}
