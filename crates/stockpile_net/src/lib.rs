//! # STOCKPILE Net
//!
//! The sync layer over `stockpile_core`: wire-encoded store updates, a
//! passive client mirror, and transactional broadcast routing.
//!
//! ## Design Principles
//!
//! 1. **Authoritative core** - mirrors display, they never decide
//! 2. **Reject before trust** - magic, version, kind and checksum are
//!    verified before any payload byte is interpreted
//! 3. **Atomic broadcasts** - a fan-out lands everywhere or nowhere
//!
//! ## Example
//!
//! ```rust,ignore
//! use stockpile_net::{StoreMirror, SyncMessage};
//!
//! let message = SyncMessage::decode(&bytes, &registry)?;
//! mirror.apply(&message);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod carrier;
pub mod error;
pub mod mirror;
pub mod protocol;

pub use carrier::{
    Carrier, CarrierListener, CarrierNode, CostFunction, FreeCostFunction, SessionId,
};
pub use error::{SyncError, SyncResult};
pub use mirror::{MirrorEntry, StoreMirror};
pub use protocol::{SyncEntry, SyncKind, SyncMessage, SYNC_MAGIC, SYNC_VERSION};
