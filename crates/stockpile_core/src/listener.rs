//! # Listener Subsystem
//!
//! Observers of store state. Two replay rules keep late subscribers and
//! departing subscribers consistent without a separate query API:
//!
//! - On subscribe (when requested), the store replays to the new listener
//!   only: one capacity announcement, then one synthetic accept per
//!   non-empty handle. The listener reconstructs the full current state.
//! - On unsubscribe (when requested), the store replays synthetic
//!   supply-to-zero events so the listener can tear its view down the same
//!   way it was built.
//!
//! Every real mutation (not simulated, not a zero delta) notifies all
//! active listeners in registration order. The live list is snapshotted
//! before each pass, so listeners may subscribe or unsubscribe from inside
//! a callback without corrupting the pass.

use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::article::Article;
use crate::fraction::Fraction;
use crate::store::StoreId;

/// Observer of one or more stores.
///
/// Deltas are signed: positive for accepts, negative for supplies.
pub trait StoreListener: Send + Sync {
    /// A handle's content changed by `delta`, leaving `new_amount`.
    fn on_change(
        &self,
        store: StoreId,
        handle: usize,
        article: &Article,
        delta: Fraction,
        new_amount: Fraction,
    );

    /// The store's capacity was announced or changed.
    fn on_capacity(&self, store: StoreId, capacity: Fraction);
}

/// An owned store notification, for forwarding off-thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    /// A handle's content changed.
    Changed {
        /// The store that changed.
        store: StoreId,
        /// The handle that changed.
        handle: usize,
        /// The article involved.
        article: Article,
        /// Signed change in amount.
        delta: Fraction,
        /// Amount on the handle after the change.
        new_amount: Fraction,
    },
    /// A store's capacity was announced or changed.
    Capacity {
        /// The store whose capacity this is.
        store: StoreId,
        /// The capacity value.
        capacity: Fraction,
    },
}

/// The set of listeners attached to one store.
///
/// Lives beside (not inside) the store's data mutex: stores finish their
/// mutation, release their own lock, then notify.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Mutex<Vec<Arc<dyn StoreListener>>>,
}

impl ListenerSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a listener at the end of the registration order.
    pub fn attach(&self, listener: &Arc<dyn StoreListener>) {
        self.listeners.lock().push(Arc::clone(listener));
    }

    /// Detaches a listener. Returns true if it was attached.
    pub fn detach(&self, listener: &Arc<dyn StoreListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Returns true if no listeners are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Notifies every active listener of a content change, in registration
    /// order.
    pub fn notify_change(
        &self,
        store: StoreId,
        handle: usize,
        article: &Article,
        delta: Fraction,
        new_amount: Fraction,
    ) {
        for listener in self.snapshot() {
            listener.on_change(store, handle, article, delta, new_amount);
        }
    }

    /// Notifies every active listener of a capacity change, in registration
    /// order.
    pub fn notify_capacity(&self, store: StoreId, capacity: Fraction) {
        for listener in self.snapshot() {
            listener.on_capacity(store, capacity);
        }
    }

    /// Copies the live list so callbacks may mutate it mid-pass.
    fn snapshot(&self) -> Vec<Arc<dyn StoreListener>> {
        self.listeners.lock().clone()
    }
}

/// Forwards every notification as an owned [`StoreEvent`] over a crossbeam
/// channel, so another thread can consume store activity.
///
/// Events are dropped silently once the receiving side is gone.
pub struct ChannelListener {
    sender: Sender<StoreEvent>,
}

impl ChannelListener {
    /// Wraps a channel sender.
    #[must_use]
    pub const fn new(sender: Sender<StoreEvent>) -> Self {
        Self { sender }
    }
}

impl StoreListener for ChannelListener {
    fn on_change(
        &self,
        store: StoreId,
        handle: usize,
        article: &Article,
        delta: Fraction,
        new_amount: Fraction,
    ) {
        let _ = self.sender.send(StoreEvent::Changed {
            store,
            handle,
            article: article.clone(),
            delta,
            new_amount,
        });
    }

    fn on_capacity(&self, store: StoreId, capacity: Fraction) {
        let _ = self.sender.send(StoreEvent::Capacity { store, capacity });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_pair() -> (Arc<dyn StoreListener>, crossbeam_channel::Receiver<StoreEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Arc::new(ChannelListener::new(tx)), rx)
    }

    #[test]
    fn test_notify_in_registration_order() {
        let set = ListenerSet::new();
        let (a, rx_a) = channel_pair();
        let (b, rx_b) = channel_pair();
        set.attach(&a);
        set.attach(&b);

        set.notify_capacity(StoreId::allocate(), Fraction::of_whole(10));
        assert!(matches!(
            rx_a.try_recv().unwrap(),
            StoreEvent::Capacity { .. }
        ));
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            StoreEvent::Capacity { .. }
        ));
    }

    #[test]
    fn test_detach() {
        let set = ListenerSet::new();
        let (a, rx_a) = channel_pair();
        set.attach(&a);
        assert!(set.detach(&a));
        assert!(!set.detach(&a));
        set.notify_capacity(StoreId::allocate(), Fraction::ONE);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_channel_listener_survives_dropped_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let listener = ChannelListener::new(tx);
        drop(rx);
        // Must not panic.
        listener.on_capacity(StoreId::allocate(), Fraction::ONE);
    }
}
