//! Error types for Tessera
//!
//! Errors fall into three groups:
//! - Restartable: the transaction must be retried with the same id
//!   ([`TesseraError::Restart`])
//! - Fatal: surfaced to the caller and never retried automatically
//! - Advisory conditions (expired or collected treaties) are not errors at
//!   all; callers check `valid_at` or `None`
//!
//! We use `thiserror` for automatic `Display` and `Error` implementations.

use crate::failure::{BackoffClass, CommitFailures};
use crate::types::{Oid, StoreId, TransactionId};
use std::io;
use thiserror::Error;

/// Result type alias for Tessera operations
pub type TesseraResult<T> = std::result::Result<T, TesseraError>;

/// Error types for Tessera
#[derive(Debug, Error)]
pub enum TesseraError {
    /// The transaction hit optimistic conflicts, unseen objects or an
    /// unreachable store and must be retried
    #[error("{txn_id} must restart: {failures}")]
    Restart {
        /// Original id of the transaction to retry
        txn_id: TransactionId,
        /// Everything that went wrong, with per-store attribution
        failures: Box<CommitFailures>,
        /// How long to wait before retrying
        backoff: BackoffClass,
    },

    /// A participant rejected the transaction for a reason unrelated to
    /// optimistic conflicts
    #[error("{txn_id} failed: {failures}")]
    TransactionFailed {
        /// Id of the failed transaction
        txn_id: TransactionId,
        /// Participant diagnostics
        failures: Box<CommitFailures>,
    },

    /// Object does not exist at its store
    #[error("object {oid} not found")]
    NotFound {
        /// Missing object
        oid: Oid,
    },

    /// Store could not be reached
    #[error("store {store} unreachable: {reason}")]
    Unreachable {
        /// Store that failed
        store: StoreId,
        /// Transport diagnostic
        reason: String,
    },

    /// No store with this name is registered
    #[error("unknown store {0}")]
    UnknownStore(String),

    /// Malformed or corrupt object data
    #[error("corrupt data for {context}: {reason}")]
    Corruption {
        /// What was being decoded
        context: String,
        /// What was wrong with it
        reason: String,
    },

    /// A blob delivered by the dissemination overlay failed verification
    #[error("signature verification failed for {oid}")]
    SignatureInvalid {
        /// Object whose blob was rejected
        oid: Oid,
    },

    /// Attempt to evict a cache entry that a transaction still pins
    #[error("cannot evict pinned object {oid} (pins={pins})")]
    EvictPinned {
        /// Pinned object
        oid: Oid,
        /// Outstanding pins at the time of the call
        pins: usize,
    },

    /// Operation not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TesseraError {
    /// Build a restart error from aggregated failures
    pub fn restart(txn_id: TransactionId, failures: CommitFailures) -> Self {
        let backoff = failures.backoff();
        TesseraError::Restart {
            txn_id,
            failures: Box::new(failures),
            backoff,
        }
    }

    /// Build a corruption error
    pub fn corruption(context: impl Into<String>, reason: impl Into<String>) -> Self {
        TesseraError::Corruption {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// True if the caller should retry the same logical transaction
    pub fn is_restartable(&self) -> bool {
        matches!(self, TesseraError::Restart { .. })
    }

    /// Transaction id carried by restart/failure errors
    pub fn txn_id(&self) -> Option<TransactionId> {
        match self {
            TesseraError::Restart { txn_id, .. }
            | TesseraError::TransactionFailed { txn_id, .. } => Some(*txn_id),
            _ => None,
        }
    }

    /// Backoff class for restartable errors
    pub fn backoff_class(&self) -> Option<BackoffClass> {
        match self {
            TesseraError::Restart { backoff, .. } => Some(*backoff),
            _ => None,
        }
    }

    /// Aggregated store failures, if any
    pub fn failures(&self) -> Option<&CommitFailures> {
        match self {
            TesseraError::Restart { failures, .. }
            | TesseraError::TransactionFailed { failures, .. } => Some(&**failures),
            _ => None,
        }
    }
}

impl From<rmp_serde::encode::Error> for TesseraError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TesseraError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TesseraError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TesseraError::Serialization(e.to_string())
    }
}
