//! # Transaction Manager
//!
//! Nested, thread-coordinated transactions over storage participants.
//!
//! ## Model
//!
//! A [`Transactor`] owns a pooled stack of transaction frames. [`open`]
//! pushes a frame and returns a [`Transaction`] guard; the guard is the
//! only way to mutate enlisted storage. Frames close in strict LIFO order:
//! commit, rollback, or implicit rollback when the guard drops.
//!
//! Participants enlist lazily - on their first real mutation inside a
//! frame, not at open - so read-only and no-op participation costs
//! nothing. Each frame enlists independently: a store touched in an inner
//! frame is snapshotted again there, so rolling back only the inner frame
//! restores only to the inner frame's start.
//!
//! ## Two-tier locking
//!
//! One thread may be designated the privileged owner ([`claim_owner`] -
//! typically the main simulation thread). Every other thread queues on a
//! secondary lock before touching the primary lock at all, so workers
//! contend with each other before they contend with the owner. The primary
//! lock is reentrant to allow nested opens on one call stack. Closing the
//! outermost frame releases primary then secondary, then yields once so
//! waiting threads get a fair chance.
//!
//! [`open`]: Transactor::open
//! [`claim_owner`]: Transactor::claim_owner

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};

use crate::error::{StockpileError, StockpileResult};

/// Rollback closure: invoked exactly once at frame close with the final
/// `committed` flag. Runs on **both** paths - on commit participants may
/// clear staged state; on rollback they must restore captured state
/// exactly, through their own notification-firing mutation paths.
pub type RollbackFn = Box<dyn FnOnce(bool) + Send>;

static NEXT_DELEGATE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a transaction participant.
///
/// Enlistment is keyed by this id, not by value: several facades may share
/// one id and therefore one rollback target per frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DelegateId(u64);

impl DelegateId {
    /// Allocates a process-unique id.
    #[must_use]
    pub fn allocate() -> Self {
        Self(NEXT_DELEGATE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Anything that can be enlisted in a transaction frame.
///
/// [`prepare_rollback`] captures whatever the participant needs to undo
/// itself *at the moment of enlistment*; stores call it on their first
/// real mutation inside a frame.
///
/// [`prepare_rollback`]: Participant::prepare_rollback
pub trait Participant: Send + Sync {
    /// The enlistment identity of this participant.
    fn delegate_id(&self) -> DelegateId;

    /// Captures current state and returns the closure that will be invoked
    /// at frame close.
    fn prepare_rollback(&self) -> RollbackFn;
}

/// One pooled frame of the transaction stack.
#[derive(Default)]
struct Frame {
    enlisted: Vec<(DelegateId, RollbackFn)>,
}

/// Mutable state behind the primary lock.
#[derive(Default)]
struct TransactorState {
    /// Pooled frames; `frames.len()` is the high-water nesting depth.
    frames: Vec<Frame>,
    /// Current nesting depth; only `frames[depth - 1]` is live.
    depth: usize,
    /// Thread currently holding the transaction system.
    holder: Option<ThreadId>,
}

impl TransactorState {
    fn push_frame(&mut self) -> usize {
        if self.depth == self.frames.len() {
            self.frames.push(Frame::default());
        }
        self.depth += 1;
        self.depth
    }

    /// Pops the top frame, returning its rollback closures in enlistment
    /// order. The frame itself stays pooled for reuse.
    fn pop_frame(&mut self) -> Vec<RollbackFn> {
        self.depth -= 1;
        let closures = self.frames[self.depth]
            .enlisted
            .drain(..)
            .map(|(_, f)| f)
            .collect();
        if self.depth == 0 {
            self.holder = None;
        }
        closures
    }

    fn check_holder(&self) -> StockpileResult<()> {
        if self.holder == Some(thread::current().id()) {
            Ok(())
        } else {
            Err(StockpileError::ConcurrentAccess)
        }
    }
}

// =============================================================================
// Transactor
// =============================================================================

/// The transaction system: two-tier locks plus the pooled frame stack.
#[derive(Default)]
pub struct Transactor {
    /// The privileged owner thread, if one has been claimed.
    owner: Mutex<Option<ThreadId>>,
    /// Queueing lock for non-owner threads. The owner never takes it.
    secondary: Mutex<()>,
    /// Reentrant lock actually guarding the frame stack.
    primary: ReentrantMutex<RefCell<TransactorState>>,
}

impl Transactor {
    /// A fresh transaction system with no owner thread.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Designates the calling thread as the privileged owner. The owner
    /// skips the secondary queue and contends on the primary lock directly.
    pub fn claim_owner(&self) {
        let me = thread::current().id();
        *self.owner.lock() = Some(me);
        tracing::debug!(thread = ?me, "transactor owner claimed");
    }

    /// Opens a transaction frame, blocking until this thread holds the
    /// system. Nested calls from the same call stack push further frames.
    pub fn open(&self) -> Transaction<'_> {
        let me = thread::current().id();
        let is_owner = *self.owner.lock() == Some(me);

        // Fast path: this thread already holds the primary lock, so this
        // is a nested open and the secondary queue does not apply.
        if let Some(guard) = self.primary.try_lock() {
            let nested = guard.borrow().depth > 0;
            if nested || is_owner {
                return self.push_frame(guard, None, me);
            }
            // Outermost non-owner open: queue on the secondary lock first.
            drop(guard);
        }

        let secondary = if is_owner {
            None
        } else {
            Some(self.secondary.lock())
        };
        let guard = self.primary.lock();
        self.push_frame(guard, secondary, me)
    }

    fn push_frame<'t>(
        &'t self,
        guard: ReentrantMutexGuard<'t, RefCell<TransactorState>>,
        secondary: Option<MutexGuard<'t, ()>>,
        me: ThreadId,
    ) -> Transaction<'t> {
        let depth = {
            let mut state = guard.borrow_mut();
            state.holder = Some(me);
            state.push_frame()
        };
        Transaction {
            primary: Some(guard),
            secondary,
            depth,
        }
    }
}

// =============================================================================
// Transaction - RAII Frame Guard
// =============================================================================

/// One nested scope of atomic intent.
///
/// Mutating storage operations take `&mut Transaction` so that every
/// mutation is covered by a frame. Exactly one terminal action applies:
/// [`commit`], [`rollback`], or dropping the guard (implicit rollback) -
/// a frame is never left dangling on the stack.
///
/// The guard holds the primary lock and is therefore `!Send`.
///
/// [`commit`]: Transaction::commit
/// [`rollback`]: Transaction::rollback
pub struct Transaction<'t> {
    primary: Option<ReentrantMutexGuard<'t, RefCell<TransactorState>>>,
    secondary: Option<MutexGuard<'t, ()>>,
    depth: usize,
}

impl Transaction<'_> {
    /// Nesting depth of this frame (the outermost frame is depth one).
    #[inline]
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Enlists a participant in this frame, capturing its rollback state
    /// via [`Participant::prepare_rollback`]. Idempotent per frame.
    ///
    /// # Errors
    ///
    /// - [`StockpileError::IllegalState`] if this frame is already closed.
    /// - [`StockpileError::OutOfOrder`] if this frame is not the innermost
    ///   open frame.
    /// - [`StockpileError::ConcurrentAccess`] if called from a thread that
    ///   does not hold the system.
    pub fn enlist<P>(&mut self, participant: &P) -> StockpileResult<()>
    where
        P: Participant + ?Sized,
    {
        self.enlist_with(participant.delegate_id(), || participant.prepare_rollback())
    }

    /// Enlists by id with an explicit capture closure. `prepare` runs only
    /// if the id is not yet enlisted in this frame, and must capture the
    /// participant's **pre-mutation** state.
    ///
    /// This is the lazy-rollback entry point stores use on their first
    /// real mutation inside a frame.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Transaction::enlist`].
    pub fn enlist_with(
        &mut self,
        delegate: DelegateId,
        prepare: impl FnOnce() -> RollbackFn,
    ) -> StockpileResult<()> {
        let cell = self
            .primary
            .as_deref()
            .ok_or_else(|| StockpileError::illegal_state("transaction already closed"))?;
        let mut state = cell.borrow_mut();
        state.check_holder()?;
        if state.depth != self.depth {
            return Err(StockpileError::OutOfOrder {
                depth: self.depth,
                top: state.depth,
            });
        }
        let frame = &mut state.frames[self.depth - 1];
        if !frame.enlisted.iter().any(|(id, _)| *id == delegate) {
            frame.enlisted.push((delegate, prepare()));
        }
        Ok(())
    }

    /// Commits this frame. Rollback closures still run (with
    /// `committed = true`) so participants can discard staged state.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Transaction::enlist`]. On [`StockpileError::OutOfOrder`]
    /// the guard is still consumed: abandoned inner frames and this frame
    /// are force-rolled back during drop.
    pub fn commit(mut self) -> StockpileResult<()> {
        self.close(true)
    }

    /// Rolls this frame back, restoring every enlisted participant to its
    /// state at enlistment.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Transaction::commit`].
    pub fn rollback(mut self) -> StockpileResult<()> {
        self.close(false)
    }

    fn close(&mut self, committed: bool) -> StockpileResult<()> {
        let cell = self
            .primary
            .as_deref()
            .ok_or_else(|| StockpileError::illegal_state("transaction already closed"))?;
        let closures = {
            let mut state = cell.borrow_mut();
            state.check_holder()?;
            if state.depth != self.depth {
                return Err(StockpileError::OutOfOrder {
                    depth: self.depth,
                    top: state.depth,
                });
            }
            state.pop_frame()
        };
        for closure in closures {
            closure(committed);
        }
        self.release();
        Ok(())
    }

    /// Drops the primary lock, then the secondary lock, then yields once
    /// so other waiting threads get a fair chance before this thread can
    /// immediately reacquire.
    fn release(&mut self) {
        self.primary = None;
        if let Some(secondary) = self.secondary.take() {
            drop(secondary);
            thread::yield_now();
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.primary.is_none() {
            return; // closed explicitly
        }
        // Inner frames abandoned above us close innermost-first. This is a
        // caller bug (frames must close in LIFO order) but scope exit may
        // never leave frames dangling.
        loop {
            let closures = {
                let Some(cell) = self.primary.as_deref() else {
                    return;
                };
                let mut state = cell.borrow_mut();
                if state.depth <= self.depth {
                    break;
                }
                tracing::error!(
                    abandoned = state.depth,
                    closing = self.depth,
                    "inner transaction frame abandoned; force-rolling back"
                );
                state.pop_frame()
            };
            for closure in closures {
                closure(false);
            }
        }
        // Close our own frame unless an outer teardown already took it.
        let ours = {
            let Some(cell) = self.primary.as_deref() else {
                return;
            };
            let mut state = cell.borrow_mut();
            if state.depth == self.depth {
                Some(state.pop_frame())
            } else {
                None
            }
        };
        if let Some(closures) = ours {
            for closure in closures {
                closure(false);
            }
        }
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Records every closure invocation as (delegate tag, committed).
    struct Probe {
        id: DelegateId,
        tag: usize,
        log: Arc<Mutex<Vec<(usize, bool)>>>,
    }

    impl Probe {
        fn new(tag: usize, log: &Arc<Mutex<Vec<(usize, bool)>>>) -> Self {
            Self {
                id: DelegateId::allocate(),
                tag,
                log: Arc::clone(log),
            }
        }
    }

    impl Participant for Probe {
        fn delegate_id(&self) -> DelegateId {
            self.id
        }

        fn prepare_rollback(&self) -> RollbackFn {
            let log = Arc::clone(&self.log);
            let tag = self.tag;
            Box::new(move |committed| log.lock().push((tag, committed)))
        }
    }

    #[test]
    fn test_closures_run_on_commit_and_rollback() {
        let transactor = Transactor::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let probe = Probe::new(1, &log);

        let mut txn = transactor.open();
        txn.enlist(&probe).unwrap();
        txn.commit().unwrap();
        assert_eq!(log.lock().as_slice(), &[(1, true)]);

        log.lock().clear();
        let mut txn = transactor.open();
        txn.enlist(&probe).unwrap();
        txn.rollback().unwrap();
        assert_eq!(log.lock().as_slice(), &[(1, false)]);
    }

    #[test]
    fn test_drop_is_implicit_rollback() {
        let transactor = Transactor::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let probe = Probe::new(7, &log);
        {
            let mut txn = transactor.open();
            txn.enlist(&probe).unwrap();
        }
        assert_eq!(log.lock().as_slice(), &[(7, false)]);
    }

    #[test]
    fn test_enlistment_is_idempotent_and_ordered() {
        let transactor = Transactor::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = Probe::new(1, &log);
        let b = Probe::new(2, &log);

        let mut txn = transactor.open();
        txn.enlist(&a).unwrap();
        txn.enlist(&b).unwrap();
        txn.enlist(&a).unwrap(); // no second capture
        txn.rollback().unwrap();
        assert_eq!(log.lock().as_slice(), &[(1, false), (2, false)]);
    }

    #[test]
    fn test_nested_frames_enlist_independently() {
        let transactor = Transactor::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let probe = Probe::new(3, &log);

        let mut outer = transactor.open();
        outer.enlist(&probe).unwrap();
        {
            let mut inner = transactor.open();
            assert_eq!(inner.depth(), 2);
            inner.enlist(&probe).unwrap();
            inner.rollback().unwrap();
        }
        // Inner frame captured and replayed its own snapshot.
        assert_eq!(log.lock().as_slice(), &[(3, false)]);
        outer.commit().unwrap();
        assert_eq!(log.lock().as_slice(), &[(3, false), (3, true)]);
    }

    #[test]
    fn test_out_of_order_close_is_detected() {
        let transactor = Transactor::new();
        let outer = transactor.open();
        let _inner = transactor.open();
        let err = outer.commit().unwrap_err();
        assert_eq!(err, StockpileError::OutOfOrder { depth: 1, top: 2 });
    }

    #[test]
    fn test_enlist_through_non_top_frame_is_out_of_order() {
        let transactor = Transactor::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let probe = Probe::new(1, &log);
        let mut outer = transactor.open();
        let _inner = transactor.open();
        let err = outer.enlist(&probe).unwrap_err();
        assert!(matches!(err, StockpileError::OutOfOrder { .. }));
    }

    #[test]
    fn test_frames_are_pooled() {
        let transactor = Transactor::new();
        for _ in 0..100 {
            let txn = transactor.open();
            txn.commit().unwrap();
        }
        let state = transactor.primary.lock();
        assert_eq!(state.borrow().frames.len(), 1);
    }

    #[test]
    fn test_parallel_open_close_smoke() {
        let transactor = Arc::new(Transactor::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::new();
        for _ in 0..4 {
            let transactor = Arc::clone(&transactor);
            let counter = Arc::clone(&counter);
            threads.push(thread::spawn(move || {
                for _ in 0..50 {
                    let txn = transactor.open();
                    counter.fetch_add(1, Ordering::Relaxed);
                    txn.commit().unwrap();
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 200);
    }

    #[test]
    fn test_owner_thread_skips_secondary_queue() {
        let transactor = Arc::new(Transactor::new());
        transactor.claim_owner();
        // Owner opening while another thread churns must make progress.
        let worker = {
            let transactor = Arc::clone(&transactor);
            thread::spawn(move || {
                for _ in 0..20 {
                    let txn = transactor.open();
                    txn.commit().unwrap();
                }
            })
        };
        for _ in 0..20 {
            let txn = transactor.open();
            txn.commit().unwrap();
        }
        worker.join().unwrap();
    }
}
