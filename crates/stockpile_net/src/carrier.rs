//! # Carrier
//!
//! Transactional broadcast routing: one carrier fans a quantity out across
//! its attached sessions inside a single transaction, so a broadcast
//! either lands consistently everywhere or not at all.
//!
//! Ordering rules are fixed and observable: the cost function is enlisted
//! and applied first, then every broadcast-eligible session is offered the
//! remainder in attachment order, skipping the sender, short-circuiting
//! once the quantity is exhausted. Any participant error abandons the
//! whole broadcast - the transaction drops (implicit rollback), a warning
//! is logged, and the caller sees zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use stockpile_core::store::DiscreteFunction;
use stockpile_core::{
    Article, DelegateId, Participant, StockpileResult, Transaction, Transactor,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one attached session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn allocate() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// An endpoint a broadcast can offer quantity to.
///
/// Blanket-implemented for every discrete store, so stores attach to a
/// carrier directly.
pub trait CarrierNode: Send + Sync {
    /// Offers up to `count` of `article`; returns how much the node took.
    ///
    /// # Errors
    ///
    /// Transaction misuse, or whatever the node's storage reports.
    fn offer_accept(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> StockpileResult<u64>;

    /// Requests up to `count` of `article`; returns how much the node gave.
    ///
    /// # Errors
    ///
    /// As for [`CarrierNode::offer_accept`].
    fn offer_supply(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> StockpileResult<u64>;
}

impl<T: DiscreteFunction + Send + Sync> CarrierNode for T {
    fn offer_accept(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> StockpileResult<u64> {
        self.accept(txn, article, count, simulate)
    }

    fn offer_supply(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> StockpileResult<u64> {
        self.supply(txn, article, count, simulate)
    }
}

/// Observer of carrier topology changes, with the same replay rules as
/// store listeners: current sessions are replayed on subscribe, and
/// detach events on unsubscribe.
pub trait CarrierListener: Send + Sync {
    /// A session joined the carrier.
    fn on_attached(&self, session: SessionId);

    /// A session left the carrier.
    fn on_detached(&self, session: SessionId);
}

/// Gatekeeper applied before any quantity is distributed.
///
/// The cost function is enlisted **first** in every broadcast frame, so
/// on rollback its closure runs in the same position it was charged in.
pub trait CostFunction: Participant {
    /// Applies the cost for moving `count` of `article`, returning how
    /// much of the request may proceed.
    ///
    /// # Errors
    ///
    /// Transaction misuse, or whatever backs the cost (a fuel store, say).
    fn apply(
        &self,
        txn: &mut Transaction<'_>,
        article: &Article,
        count: u64,
        simulate: bool,
    ) -> StockpileResult<u64>;
}

/// Cost function that passes every request through unchanged.
pub struct FreeCostFunction {
    delegate_id: DelegateId,
}

impl FreeCostFunction {
    /// A new pass-through cost function.
    #[must_use]
    pub fn new() -> Self {
        Self {
            delegate_id: DelegateId::allocate(),
        }
    }
}

impl Default for FreeCostFunction {
    fn default() -> Self {
        Self::new()
    }
}

impl Participant for FreeCostFunction {
    fn delegate_id(&self) -> DelegateId {
        self.delegate_id
    }

    fn prepare_rollback(&self) -> stockpile_core::transact::RollbackFn {
        Box::new(|_| {})
    }
}

impl CostFunction for FreeCostFunction {
    fn apply(
        &self,
        _txn: &mut Transaction<'_>,
        _article: &Article,
        count: u64,
        _simulate: bool,
    ) -> StockpileResult<u64> {
        Ok(count)
    }
}

struct Session {
    id: SessionId,
    node: Arc<dyn CarrierNode>,
    eligible: bool,
}

/// Broadcast router over attached sessions.
pub struct Carrier {
    transactor: Arc<Transactor>,
    cost: Arc<dyn CostFunction>,
    sessions: Mutex<Vec<Session>>,
    listeners: Mutex<Vec<Arc<dyn CarrierListener>>>,
}

impl Carrier {
    /// A carrier routing under `transactor` with an explicit cost function.
    #[must_use]
    pub fn new(transactor: Arc<Transactor>, cost: Arc<dyn CostFunction>) -> Self {
        Self {
            transactor,
            cost,
            sessions: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// A carrier whose broadcasts are free.
    #[must_use]
    pub fn with_free_cost(transactor: Arc<Transactor>) -> Self {
        Self::new(transactor, Arc::new(FreeCostFunction::new()))
    }

    /// Attaches a node at the end of the attachment order. Ineligible
    /// sessions can originate broadcasts but are never offered quantity.
    pub fn attach(&self, node: Arc<dyn CarrierNode>, eligible: bool) -> SessionId {
        let id = SessionId::allocate();
        self.sessions.lock().push(Session { id, node, eligible });
        for listener in self.listener_snapshot() {
            listener.on_attached(id);
        }
        id
    }

    /// Detaches a session. Returns true if it was attached.
    pub fn detach(&self, session: SessionId) -> bool {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|s| s.id != session);
        let removed = sessions.len() != before;
        drop(sessions);
        if removed {
            for listener in self.listener_snapshot() {
                listener.on_detached(session);
            }
        }
        removed
    }

    /// Number of attached sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Subscribes a listener, replaying the current sessions to it.
    pub fn start_listening(&self, listener: &Arc<dyn CarrierListener>) {
        let current: Vec<SessionId> = self.sessions.lock().iter().map(|s| s.id).collect();
        self.listeners.lock().push(Arc::clone(listener));
        for id in current {
            listener.on_attached(id);
        }
    }

    /// Unsubscribes a listener, replaying detach events to it.
    pub fn stop_listening(&self, listener: &Arc<dyn CarrierListener>) {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        let removed = listeners.len() != before;
        drop(listeners);
        if removed {
            for id in self.sessions.lock().iter().map(|s| s.id).collect::<Vec<_>>() {
                listener.on_detached(id);
            }
        }
    }

    /// Broadcasts an accept: `from` is pushing `count` of `article` out to
    /// the other sessions. Returns how much was distributed; zero if any
    /// participant failed (the whole broadcast rolls back).
    #[must_use]
    pub fn broadcast_accept(&self, from: SessionId, article: &Article, count: u64) -> u64 {
        self.broadcast(from, article, count, true)
    }

    /// Broadcasts a supply: `from` is pulling `count` of `article` in from
    /// the other sessions. Returns how much was gathered; zero if any
    /// participant failed.
    #[must_use]
    pub fn broadcast_supply(&self, from: SessionId, article: &Article, count: u64) -> u64 {
        self.broadcast(from, article, count, false)
    }

    fn broadcast(&self, from: SessionId, article: &Article, count: u64, accepting: bool) -> u64 {
        if count == 0 {
            return 0;
        }
        let mut txn = self.transactor.open();
        match self.walk(&mut txn, from, article, count, accepting) {
            Ok(moved) => match txn.commit() {
                Ok(()) => moved,
                Err(error) => {
                    tracing::warn!(%error, %article, count, "broadcast commit failed");
                    0
                }
            },
            Err(error) => {
                tracing::warn!(%error, %article, count, "broadcast abandoned, rolling back");
                // Dropping the guard rolls the whole broadcast back.
                drop(txn);
                0
            }
        }
    }

    fn walk(
        &self,
        txn: &mut Transaction<'_>,
        from: SessionId,
        article: &Article,
        count: u64,
        accepting: bool,
    ) -> StockpileResult<u64> {
        // Cost first: it must head the enlistment order of this frame.
        txn.enlist(self.cost.as_ref())?;
        let budget = self.cost.apply(txn, article, count, false)?;
        if budget == 0 {
            return Ok(0);
        }

        let nodes: Vec<Arc<dyn CarrierNode>> = self
            .sessions
            .lock()
            .iter()
            .filter(|s| s.eligible && s.id != from)
            .map(|s| Arc::clone(&s.node))
            .collect();

        let mut remaining = budget;
        for node in nodes {
            if remaining == 0 {
                break;
            }
            let moved = if accepting {
                node.offer_accept(txn, article, remaining, false)?
            } else {
                node.offer_supply(txn, article, remaining, false)?
            };
            remaining -= moved;
        }
        Ok(budget - remaining)
    }

    fn listener_snapshot(&self) -> Vec<Arc<dyn CarrierListener>> {
        self.listeners.lock().clone()
    }
}
