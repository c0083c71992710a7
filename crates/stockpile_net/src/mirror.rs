//! # Store Mirror
//!
//! The receiving side of the sync protocol: a passive replica of one
//! remote store, keyed by handle, maintaining a running used-capacity
//! aggregate so clients never re-sum the whole table per message.
//!
//! A mirror is display state. It applies messages verbatim and holds no
//! transaction machinery; the authoritative store lives on the other peer.

use std::collections::HashMap;

use parking_lot::Mutex;

use stockpile_core::{Article, Fraction, MutableFraction};

use crate::protocol::{SyncKind, SyncMessage};

/// One mirrored handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorEntry {
    /// What the remote handle stores.
    pub article: Article,
    /// How much it stores.
    pub amount: Fraction,
}

#[derive(Default)]
struct MirrorInner {
    entries: HashMap<u32, MirrorEntry>,
    capacity: Fraction,
    used: MutableFraction,
}

/// Passive replica of a remote store.
#[derive(Default)]
pub struct StoreMirror {
    inner: Mutex<MirrorInner>,
}

impl StoreMirror {
    /// An empty mirror with zero capacity; the first
    /// [`SyncKind::FullRefresh`] populates it.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one decoded sync message.
    pub fn apply(&self, message: &SyncMessage) {
        let mut inner = self.inner.lock();
        match message.kind {
            SyncKind::FullRefresh => {
                inner.entries.clear();
                inner.used.set(Fraction::ZERO);
                for entry in &message.entries {
                    if entry.amount.is_zero() {
                        continue;
                    }
                    inner.used.add(entry.amount);
                    inner.entries.insert(
                        entry.handle,
                        MirrorEntry {
                            article: entry.article.clone(),
                            amount: entry.amount,
                        },
                    );
                }
            }
            SyncKind::Update | SyncKind::UpdateWithCapacity => {
                for entry in &message.entries {
                    let prior = if entry.amount.is_zero() {
                        inner.entries.remove(&entry.handle)
                    } else {
                        inner.entries.insert(
                            entry.handle,
                            MirrorEntry {
                                article: entry.article.clone(),
                                amount: entry.amount,
                            },
                        )
                    };
                    let prior = prior.map_or(Fraction::ZERO, |e| e.amount);
                    // Aggregate adjusted by the delta, never re-summed.
                    let used = inner.used.snapshot().add(entry.amount.subtract(prior));
                    inner.used.set(used);
                }
            }
        }
        if let Some(capacity) = message.capacity {
            inner.capacity = capacity;
        }
    }

    /// The mirrored capacity bound.
    #[must_use]
    pub fn capacity(&self) -> Fraction {
        self.inner.lock().capacity
    }

    /// The running total across all mirrored handles.
    #[must_use]
    pub fn used(&self) -> Fraction {
        self.inner.lock().used.snapshot()
    }

    /// Remaining capacity, by subtraction; [`Fraction::MAX`] mirrors stay
    /// unbounded.
    #[must_use]
    pub fn remaining(&self) -> Fraction {
        let inner = self.inner.lock();
        if inner.capacity.is_max() {
            Fraction::MAX
        } else {
            inner.capacity.subtract(inner.used.snapshot())
        }
    }

    /// One handle's mirrored state, if non-empty.
    #[must_use]
    pub fn entry(&self, handle: u32) -> Option<MirrorEntry> {
        self.inner.lock().entries.get(&handle).cloned()
    }

    /// Number of non-empty mirrored handles.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Every non-empty handle, sorted by handle for stable display.
    #[must_use]
    pub fn view(&self) -> Vec<(u32, MirrorEntry)> {
        let mut view: Vec<_> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(&handle, entry)| (handle, entry.clone()))
            .collect();
        view.sort_by_key(|(handle, _)| *handle);
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SyncEntry;

    fn entry(handle: u32, name: &str, amount: Fraction) -> SyncEntry {
        SyncEntry {
            article: Article::item(name),
            amount,
            handle,
        }
    }

    fn refresh(entries: Vec<SyncEntry>, capacity: i64) -> SyncMessage {
        SyncMessage {
            kind: SyncKind::FullRefresh,
            entries,
            capacity: Some(Fraction::of_whole(capacity)),
        }
    }

    #[test]
    fn test_full_refresh_replaces_wholesale() {
        let mirror = StoreMirror::new();
        mirror.apply(&refresh(
            vec![entry(0, "coal", Fraction::of_whole(10))],
            64,
        ));
        mirror.apply(&refresh(
            vec![entry(3, "iron", Fraction::of_whole(7))],
            32,
        ));

        assert_eq!(mirror.entry_count(), 1);
        assert!(mirror.entry(0).is_none());
        assert_eq!(mirror.entry(3).unwrap().amount, Fraction::of_whole(7));
        assert_eq!(mirror.used(), Fraction::of_whole(7));
        assert_eq!(mirror.capacity(), Fraction::of_whole(32));
    }

    #[test]
    fn test_update_adjusts_aggregate_by_delta() {
        let mirror = StoreMirror::new();
        mirror.apply(&refresh(
            vec![
                entry(0, "coal", Fraction::of_whole(10)),
                entry(1, "iron", Fraction::of_whole(5)),
            ],
            64,
        ));

        mirror.apply(&SyncMessage {
            kind: SyncKind::Update,
            entries: vec![entry(0, "coal", Fraction::of_whole(4))],
            capacity: None,
        });
        assert_eq!(mirror.used(), Fraction::of_whole(9));
        assert_eq!(mirror.remaining(), Fraction::of_whole(55));

        // Zero amount removes the handle.
        mirror.apply(&SyncMessage {
            kind: SyncKind::Update,
            entries: vec![entry(1, "iron", Fraction::ZERO)],
            capacity: None,
        });
        assert_eq!(mirror.entry_count(), 1);
        assert_eq!(mirror.used(), Fraction::of_whole(4));
    }

    #[test]
    fn test_update_with_capacity_sets_capacity() {
        let mirror = StoreMirror::new();
        mirror.apply(&refresh(vec![], 64));
        mirror.apply(&SyncMessage {
            kind: SyncKind::UpdateWithCapacity,
            entries: vec![entry(0, "coal", Fraction::of_whole(2))],
            capacity: Some(Fraction::of_whole(128)),
        });
        assert_eq!(mirror.capacity(), Fraction::of_whole(128));
        assert_eq!(mirror.used(), Fraction::of_whole(2));
    }

    #[test]
    fn test_fractional_amounts_aggregate_exactly() {
        let mirror = StoreMirror::new();
        mirror.apply(&refresh(
            vec![
                entry(0, "water", Fraction::new(1, 3).unwrap()),
                entry(1, "water", Fraction::new(1, 6).unwrap()),
            ],
            1,
        ));
        assert_eq!(mirror.used(), Fraction::new(1, 2).unwrap());
        assert_eq!(mirror.remaining(), Fraction::new(1, 2).unwrap());
    }
}
