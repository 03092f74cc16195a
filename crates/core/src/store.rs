//! Store RPC contract and store registry
//!
//! [`StoreProxy`] is the boundary to a remote store. The transport behind it
//! (handshake, authentication, framing) is not part of this crate; only the
//! request/response shapes are. [`StoreRegistry`] resolves store names to
//! live proxies and is shared by the cache, the transaction manager and
//! proxy-map deserialization.
//!
//! # Two-phase contract
//!
//! ```text
//! prepare(request)  -> Prepared | Conflict | Unseen | Failed   (Err = unreachable)
//! commit(attempt)   -> apply staged writes, bump versions
//! abort(attempt)    -> drop staged writes
//! ```
//!
//! A store must not make writes visible before `commit`. A prepare that is
//! never followed by commit leaves no visible effect. Staging is keyed by
//! the request's [`AttemptId`]: `commit` and `abort` only ever touch the
//! attempt they name.

use crate::error::{TesseraError, TesseraResult};
use crate::failure::VersionConflict;
use crate::types::{AttemptId, StoreId, TransactionId, VersionedObject};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One write-set entry destined for a single store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareWrite {
    /// Object number at the store
    pub onum: u64,
    /// Version the writer last observed (0 for objects created in this
    /// transaction)
    pub expected_version: u64,
    /// New payload
    pub payload: Vec<u8>,
}

/// Per-store prepare request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRequest {
    /// Transaction being prepared
    pub txn_id: TransactionId,
    /// Attempt this round belongs to
    pub attempt: AttemptId,
    /// Write-set entries owned by this store
    pub writes: Vec<PrepareWrite>,
    /// Observed versions of read-set entries owned by this store
    pub reads: Vec<(u64, u64)>,
}

impl PrepareRequest {
    /// Empty request for `txn_id` under a fresh attempt
    pub fn new(txn_id: TransactionId) -> Self {
        Self::for_attempt(txn_id, AttemptId::new())
    }

    /// Empty request for `txn_id` in the round identified by `attempt`
    pub fn for_attempt(txn_id: TransactionId, attempt: AttemptId) -> Self {
        Self {
            txn_id,
            attempt,
            writes: Vec::new(),
            reads: Vec::new(),
        }
    }

    /// True if the request carries no writes
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }
}

/// A store's answer to a prepare request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// Validation passed; writes are staged
    Prepared {
        /// Version each written object will carry once committed
        new_versions: BTreeMap<u64, u64>,
    },
    /// Read or write entries whose version has advanced
    Conflict(Vec<VersionConflict>),
    /// Object numbers the store has no knowledge of
    Unseen(Vec<u64>),
    /// Unrecoverable error unrelated to optimistic conflicts
    Failed(String),
}

impl PrepareOutcome {
    /// True for [`PrepareOutcome::Prepared`]
    pub fn is_prepared(&self) -> bool {
        matches!(self, PrepareOutcome::Prepared { .. })
    }
}

/// RPC boundary to a remote store
///
/// Thread safety: implementations are shared across application threads
/// and prepare fan-out threads.
pub trait StoreProxy: Send + Sync {
    /// Store identity
    fn id(&self) -> &StoreId;

    /// Fetch the committed copy of an object
    ///
    /// # Errors
    ///
    /// `NotFound` if the store has no such object, `Unreachable` on
    /// transport failure.
    fn fetch(&self, onum: u64) -> TesseraResult<VersionedObject>;

    /// Reserve a fresh object number for an object created in a transaction
    fn allocate_onum(&self) -> TesseraResult<u64>;

    /// Validate and stage a transaction's partition
    fn prepare(&self, request: &PrepareRequest) -> TesseraResult<PrepareOutcome>;

    /// Apply the writes staged by a prepared attempt
    ///
    /// # Errors
    ///
    /// `InvalidState` if nothing is staged under `attempt`, `Unreachable`
    /// on transport failure.
    fn commit(&self, attempt: AttemptId) -> TesseraResult<()>;

    /// Drop the writes staged by an attempt, if any
    fn abort(&self, attempt: AttemptId) -> TesseraResult<()>;

    /// Public key used to verify overlay-delivered objects, if the store
    /// signs them
    fn public_key(&self) -> Option<[u8; 32]> {
        None
    }
}

/// Worker-wide mapping from store name to live proxy
#[derive(Default)]
pub struct StoreRegistry {
    stores: DashMap<StoreId, Arc<dyn StoreProxy>>,
}

impl StoreRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under its own id, replacing any previous proxy
    pub fn register(&self, store: Arc<dyn StoreProxy>) {
        let id = store.id().clone();
        tracing::debug!(target: "tessera::store", store = %id, "Store registered");
        self.stores.insert(id, store);
    }

    /// Resolve a store id
    pub fn resolve(&self, id: &StoreId) -> TesseraResult<Arc<dyn StoreProxy>> {
        self.stores
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TesseraError::UnknownStore(id.to_string()))
    }

    /// Resolve a store by name (used when decoding wire data)
    pub fn resolve_name(&self, name: &str) -> TesseraResult<Arc<dyn StoreProxy>> {
        self.resolve(&StoreId::new(name))
    }

    /// Registered store ids, unordered
    pub fn store_ids(&self) -> Vec<StoreId> {
        self.stores.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered stores
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// True if no store is registered
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.store_ids())
            .finish()
    }
}
