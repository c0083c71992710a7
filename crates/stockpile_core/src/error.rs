//! # Storage Error Types
//!
//! All errors that can occur in the storage and transaction system.
//!
//! Capacity and availability shortfalls are **not** errors: `accept` and
//! `supply` report partial success through their return value. Everything in
//! this module is a caller bug or a malformed input, and fails fast without
//! partially applying.

use thiserror::Error;

/// Errors that can occur in the storage and transaction system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StockpileError {
    /// A precondition on an argument was violated (negative amount,
    /// divisor below one, handle out of range, missing article).
    #[error("invalid argument: {what}")]
    InvalidArgument {
        /// What was wrong with the argument.
        what: String,
    },

    /// An operation was attempted on a closed or consumed transaction.
    #[error("illegal state: {what}")]
    IllegalState {
        /// What state the operation found.
        what: String,
    },

    /// A transaction frame was closed or mutated through while not the
    /// innermost open frame. Nested frames must close innermost-first.
    #[error("out-of-order transaction close: frame at depth {depth}, top is {top}")]
    OutOfOrder {
        /// Depth of the frame the caller tried to operate on.
        depth: usize,
        /// Depth of the current innermost open frame.
        top: usize,
    },

    /// The transaction system was touched from a thread that does not
    /// hold it.
    #[error("concurrent access: calling thread does not hold the transaction system")]
    ConcurrentAccess,

    /// A storage layout file was malformed.
    #[error("invalid storage layout: {reason}")]
    InvalidConfig {
        /// Why the layout was rejected.
        reason: String,
    },
}

impl StockpileError {
    /// Shorthand for an [`StockpileError::InvalidArgument`] with an owned message.
    #[must_use]
    pub fn invalid_argument(what: impl Into<String>) -> Self {
        Self::InvalidArgument { what: what.into() }
    }

    /// Shorthand for an [`StockpileError::IllegalState`] with an owned message.
    #[must_use]
    pub fn illegal_state(what: impl Into<String>) -> Self {
        Self::IllegalState { what: what.into() }
    }

    /// Shorthand for an [`StockpileError::InvalidConfig`] with an owned message.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Result type for storage and transaction operations.
pub type StockpileResult<T> = Result<T, StockpileError>;
