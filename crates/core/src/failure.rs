//! Aggregated commit failures
//!
//! A commit that spans several stores can fail at more than one of them.
//! [`CommitFailures`] collects every per-store failure into a single value:
//! the union of version conflicts and unseen objects, plus one attributed
//! message per failing store.

use crate::types::{Oid, StoreId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// How a caller should wait before retrying a restarted transaction
///
/// Ordered from least to most conservative; aggregation keeps the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum BackoffClass {
    /// Retry immediately
    #[default]
    None,
    /// Retry after a fixed delay
    NonExponential,
    /// Retry after an exponentially growing delay
    Exponential,
}

/// A read- or write-set entry whose version advanced at the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConflict {
    /// The conflicting object
    pub oid: Oid,
    /// Version the transaction observed
    pub expected_version: u64,
    /// Version currently committed at the store
    pub actual_version: u64,
    /// Payload currently committed at the store
    pub actual_payload: Vec<u8>,
}

/// Why a single store rejected a prepare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// One or more version conflicts
    Conflict,
    /// The store has no knowledge of some objects (replication race)
    Unseen,
    /// The store did not answer, or answered after the deadline
    Unreachable,
    /// Unrecoverable error unrelated to optimistic conflicts
    Rejected,
}

impl FailureKind {
    /// Backoff class tagged on this kind of failure
    pub fn backoff(&self) -> BackoffClass {
        match self {
            FailureKind::Unseen | FailureKind::Rejected => BackoffClass::None,
            FailureKind::Conflict => BackoffClass::NonExponential,
            FailureKind::Unreachable => BackoffClass::Exponential,
        }
    }
}

/// Failure attributed to one store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFailure {
    /// Store that failed
    pub store: StoreId,
    /// Failure category
    pub kind: FailureKind,
    /// Human-readable diagnostic
    pub message: String,
}

/// Union of all per-store failures of one commit attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitFailures {
    /// Version conflicts, keyed by object
    pub conflicts: BTreeMap<Oid, VersionConflict>,
    /// Objects some store had never seen
    pub unseen: BTreeSet<Oid>,
    /// Per-store diagnostics, in the order they were recorded
    pub stores: Vec<StoreFailure>,
}

impl CommitFailures {
    /// Empty failure set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record version conflicts reported by `store`
    pub fn record_conflicts(&mut self, store: &StoreId, conflicts: Vec<VersionConflict>) {
        let oids: Vec<String> = conflicts.iter().map(|c| c.oid.to_string()).collect();
        self.stores.push(StoreFailure {
            store: store.clone(),
            kind: FailureKind::Conflict,
            message: format!("version conflict on {}", oids.join(", ")),
        });
        for conflict in conflicts {
            self.conflicts.insert(conflict.oid.clone(), conflict);
        }
    }

    /// Record objects `store` has no knowledge of
    pub fn record_unseen(&mut self, store: &StoreId, oids: Vec<Oid>) {
        let names: Vec<String> = oids.iter().map(|o| o.to_string()).collect();
        self.stores.push(StoreFailure {
            store: store.clone(),
            kind: FailureKind::Unseen,
            message: format!("unseen objects {}", names.join(", ")),
        });
        self.unseen.extend(oids);
    }

    /// Record that `store` could not be reached
    pub fn record_unreachable(&mut self, store: &StoreId, reason: impl Into<String>) {
        self.stores.push(StoreFailure {
            store: store.clone(),
            kind: FailureKind::Unreachable,
            message: reason.into(),
        });
    }

    /// Record an unrecoverable rejection from `store`
    pub fn record_rejected(&mut self, store: &StoreId, reason: impl Into<String>) {
        self.stores.push(StoreFailure {
            store: store.clone(),
            kind: FailureKind::Rejected,
            message: reason.into(),
        });
    }

    /// Fold another failure set into this one
    pub fn merge(&mut self, other: CommitFailures) {
        self.conflicts.extend(other.conflicts);
        self.unseen.extend(other.unseen);
        self.stores.extend(other.stores);
    }

    /// True if nothing failed
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// True if any store rejected the transaction unrecoverably
    pub fn is_fatal(&self) -> bool {
        self.stores.iter().any(|s| s.kind == FailureKind::Rejected)
    }

    /// Most conservative backoff class over all failures
    pub fn backoff(&self) -> BackoffClass {
        self.stores
            .iter()
            .map(|s| s.kind.backoff())
            .max()
            .unwrap_or_default()
    }

    /// Stores that reported a failure, deduplicated
    pub fn failed_stores(&self) -> BTreeSet<StoreId> {
        self.stores.iter().map(|s| s.store.clone()).collect()
    }
}

impl fmt::Display for CommitFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} conflict(s), {} unseen",
            self.conflicts.len(),
            self.unseen.len()
        )?;
        for failure in &self.stores {
            write!(f, "; [{}] {}", failure.store, failure.message)?;
        }
        Ok(())
    }
}
