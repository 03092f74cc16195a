//! Core types for Tessera
//!
//! This module defines the foundational identity and data types:
//! - StoreId: Name of a store that owns objects
//! - Oid: Global object identity (store + object number)
//! - TransactionId: Identity of a (possibly restarted) transaction
//! - AttemptId: Identity of one prepare/commit round
//! - WorkerId: Identity of a worker process/context
//! - VersionedObject: The unit of storage

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Name of a store
///
/// Store names are the stable identity used on the wire and in
/// serialized proxy maps. Cloning is cheap (shared string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(Arc<str>);

impl StoreId {
    /// Create a store id from a name
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The store name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoreId {
    fn from(name: &str) -> Self {
        StoreId::new(name)
    }
}

/// Object identity: (store, object number)
///
/// Globally unique and immutable once assigned. Ordering is store first,
/// then object number, which keeps per-store partitions contiguous in
/// ordered maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Oid {
    /// Owning store
    pub store: StoreId,
    /// Object number within the store
    pub onum: u64,
}

impl Oid {
    /// Create a new object id
    pub fn new(store: StoreId, onum: u64) -> Self {
        Self { store, onum }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.onum)
    }
}

/// Identity of a transaction
///
/// A restarted transaction keeps its id so callers can tell "retry the
/// same logical transaction" apart from an unrelated failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Wrap a raw id
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric id
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Identity of one commit attempt
///
/// Every prepare round runs under a fresh attempt id, including a restart
/// that keeps its [`TransactionId`]. Transaction ids are only unique per
/// worker, so stores key staged writes and locks by attempt instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(Uuid);

impl AttemptId {
    /// Create a new random AttemptId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0.simple())
    }
}

/// Identity of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(Uuid);

impl WorkerId {
    /// Create a new random WorkerId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unit of storage
///
/// A store is the sole authority for incrementing `version`. A worker's
/// cached copy is a shadow that may be stale. Version 0 means the object
/// has never been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedObject {
    /// Object identity
    pub oid: Oid,
    /// Monotonically increasing version assigned by the owning store
    pub version: u64,
    /// Opaque serialized payload
    pub payload: Vec<u8>,
}

impl VersionedObject {
    /// Create a new versioned object
    pub fn new(oid: Oid, version: u64, payload: Vec<u8>) -> Self {
        Self {
            oid,
            version,
            payload,
        }
    }

    /// The owning store
    pub fn store(&self) -> &StoreId {
        &self.oid.store
    }
}
