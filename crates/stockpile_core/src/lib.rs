//! # STOCKPILE Core
//!
//! Transactional fungible-article storage.
//!
//! ## Design Principles
//!
//! 1. **Zero floating point** - All amounts are exact `(whole, numerator, divisor)` fractions
//! 2. **Nested transactions** - Every mutation runs inside a frame that can roll back exactly
//! 3. **Simulation is free** - `simulate = true` answers through the real code path, mutating nothing
//! 4. **External configuration** - Storage layouts declared in TOML files
//!
//! ## Thread Safety
//!
//! One transaction runs at a time across the whole system; worker threads
//! block fairly on [`Transactor::open`] and nest freely on the thread that
//! holds the root frame.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stockpile_core::{Article, SlottedStore, Transactor};
//! use stockpile_core::store::DiscreteFunction;
//!
//! let transactor = Transactor::new();
//! let chest = SlottedStore::new(27, 1728);
//!
//! let mut txn = transactor.open();
//! let taken = chest.accept(&mut txn, &Article::item("iron_ingot"), 40, false)?;
//! txn.commit()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod article;
pub mod config;
pub mod error;
pub mod fraction;
pub mod listener;
pub mod snapshot;
pub mod store;
pub mod transact;

pub use article::{Article, ArticleKind, ArticleRegistry, InMemoryArticleRegistry};
pub use config::{BuiltStore, StorageLayout};
pub use error::{StockpileError, StockpileResult};
pub use fraction::{Fraction, MutableFraction};
pub use listener::{ChannelListener, StoreEvent, StoreListener};
pub use snapshot::{ArticleRecord, SnapshotEntry, StoreSnapshot};
pub use store::{DynamicStore, SlottedStore, StoreId, StoredArticleView, Tank};
pub use transact::{DelegateId, Participant, Transaction, Transactor};
