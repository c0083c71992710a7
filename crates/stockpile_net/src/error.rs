//! # Sync Error Types
//!
//! Decode failures for the wire sync protocol. Everything a peer can get
//! wrong is rejected with a specific variant before any state changes.

use thiserror::Error;

/// Errors decoding a sync message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The message does not start with the protocol magic.
    #[error("bad magic: expected \"SKWP\", got {found:?}")]
    BadMagic {
        /// The four bytes actually found.
        found: [u8; 4],
    },

    /// The message carries an unsupported protocol version.
    #[error("unsupported protocol version {found}")]
    BadVersion {
        /// The version byte actually found.
        found: u8,
    },

    /// The kind byte names no known message kind.
    #[error("unknown message kind {found}")]
    BadKind {
        /// The kind byte actually found.
        found: u8,
    },

    /// The message ends before its declared content does.
    #[error("truncated message: needed {needed} more bytes")]
    Truncated {
        /// How many bytes were missing.
        needed: usize,
    },

    /// The CRC32 trailer does not match the message content.
    #[error("checksum mismatch: computed {computed:#010x}, message carries {carried:#010x}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes.
        computed: u32,
        /// Checksum the message carried.
        carried: u32,
    },

    /// An entry names a raw article id the registry does not know.
    #[error("unknown article id {raw_id}")]
    UnknownArticle {
        /// The unrecognized raw id.
        raw_id: u32,
    },

    /// An entry carries an amount that fails fraction validation.
    #[error("invalid amount in entry {entry}")]
    InvalidAmount {
        /// Index of the offending entry.
        entry: usize,
    },
}

/// Convenience alias for sync results.
pub type SyncResult<T> = Result<T, SyncError>;
