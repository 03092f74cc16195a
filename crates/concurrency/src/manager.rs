//! Transaction manager
//!
//! Routes transactional reads and writes through the object cache and runs
//! the two-phase commit across every store a transaction touched.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. Nested context: fold sets into the parent, return it. No store traffic.
//! 2. mark_preparing()
//! 3. partition() - one prepare request per store (writes + observed reads),
//!    all under a fresh AttemptId
//! 4. prepare_all() - parallel fan-out, bounded by prepare_timeout
//! 5. validate_round() - fold replies into one verdict
//! 6. All prepared: commit at every participant, install new shadows
//!    Otherwise: abort at every participant, refresh conflicting shadows,
//!    return Restart (or TransactionFailed if any store rejected)
//! 7. Release write pins
//! ```
//!
//! A store never makes writes visible before step 6, so a round where one
//! store conflicts leaves nothing behind at the stores that prepared.
//! Commit and abort name the attempt, never just the transaction id, so a
//! straggling prepare from an earlier attempt cannot touch a later one.

use crate::prepare::{prepare_all, Participant};
use crate::transaction::{TransactionContext, TransactionStatus};
use crate::validation::validate_round;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_cache::ObjectCache;
use tessera_core::{
    AttemptId, Oid, StoreId, StoreRegistry, TesseraError, TesseraResult, TransactionId,
};
use tracing::{debug, error, info, warn};

/// Default bound on the prepare phase
pub const DEFAULT_PREPARE_TIMEOUT: Duration = Duration::from_secs(2);

/// What a successful top-level commit produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Committed transaction
    pub txn_id: TransactionId,
    /// New version of every written object
    pub versions: BTreeMap<Oid, u64>,
    /// Number of stores that took part
    pub participants: usize,
}

/// Result of [`TransactionManager::commit`]
#[derive(Debug)]
pub enum CommitOutcome {
    /// A nested context was folded into its parent, returned here
    Merged(TransactionContext),
    /// A top-level transaction committed at every participant
    Committed(CommitReceipt),
}

impl CommitOutcome {
    /// The parent context, for nested commits
    pub fn into_parent(self) -> Option<TransactionContext> {
        match self {
            CommitOutcome::Merged(parent) => Some(parent),
            CommitOutcome::Committed(_) => None,
        }
    }

    /// The receipt, for top-level commits
    pub fn receipt(&self) -> Option<&CommitReceipt> {
        match self {
            CommitOutcome::Committed(receipt) => Some(receipt),
            CommitOutcome::Merged(_) => None,
        }
    }
}

/// Transaction statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionStats {
    /// Top-level transactions currently running
    pub active_count: u64,
    /// Top-level attempts started (restarts included)
    pub total_started: u64,
    /// Attempts that committed
    pub total_committed: u64,
    /// Attempts that ended in a restart
    pub total_restarted: u64,
    /// Attempts rejected unrecoverably
    pub total_failed: u64,
    /// Attempts aborted by the caller
    pub total_aborted: u64,
}

impl TransactionStats {
    /// Attempts that reached a terminal state
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_restarted + self.total_failed + self.total_aborted
    }

    /// Restarted / started
    pub fn restart_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_restarted as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}

/// Coordinates transactions for one worker
///
/// Shared across application threads; every method takes `&self`.
pub struct TransactionManager {
    registry: Arc<StoreRegistry>,
    cache: Arc<ObjectCache>,
    prepare_timeout: Duration,
    next_txn_id: AtomicU64,
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_restarted: AtomicU64,
    total_failed: AtomicU64,
    total_aborted: AtomicU64,
}

impl TransactionManager {
    /// Manager over `cache`, resolving stores through `registry`
    pub fn new(registry: Arc<StoreRegistry>, cache: Arc<ObjectCache>) -> Self {
        Self {
            registry,
            cache,
            prepare_timeout: DEFAULT_PREPARE_TIMEOUT,
            next_txn_id: AtomicU64::new(1),
            active_count: AtomicU64::new(0),
            total_started: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_restarted: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_aborted: AtomicU64::new(0),
        }
    }

    /// Bound the prepare phase by `timeout`
    pub fn with_prepare_timeout(mut self, timeout: Duration) -> Self {
        self.prepare_timeout = timeout;
        self
    }

    /// Prepare-phase bound
    pub fn prepare_timeout(&self) -> Duration {
        self.prepare_timeout
    }

    /// Cache the manager reads through
    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    // === Begin ===

    /// Start a top-level transaction with a fresh id
    pub fn begin(&self) -> TransactionContext {
        let txn_id = TransactionId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        self.begin_restart(txn_id)
    }

    /// Start another attempt of a restarted transaction under its id
    pub fn begin_restart(&self, txn_id: TransactionId) -> TransactionContext {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
        debug!(target: "tessera::txn", txn = %txn_id, "Begin");
        TransactionContext::new(txn_id)
    }

    /// Start a transaction nested in `parent`
    pub fn begin_nested(&self, parent: TransactionContext) -> TesseraResult<TransactionContext> {
        TransactionContext::nested(parent)
    }

    // === Object access ===

    /// Read an object inside `ctx`
    ///
    /// Pending writes anywhere in the context chain are returned first.
    /// Otherwise the cached copy is read and its version recorded.
    pub fn read(&self, ctx: &mut TransactionContext, oid: &Oid) -> TesseraResult<Vec<u8>> {
        ctx.ensure_active()?;
        if let Some(write) = ctx.lookup_write(oid) {
            return Ok(write.payload.clone());
        }

        let entry = self.cache.get(oid)?;
        self.cache.register_read(&entry);
        let object = entry.snapshot();
        ctx.record_read(oid.clone(), object.version)?;
        Ok(object.payload)
    }

    /// Write an object inside `ctx`
    ///
    /// The first write pins the cache row until the transaction ends. The
    /// write is based on the version the transaction observed, or the cached
    /// version for blind writes.
    pub fn write(
        &self,
        ctx: &mut TransactionContext,
        oid: &Oid,
        payload: Vec<u8>,
    ) -> TesseraResult<()> {
        ctx.ensure_active()?;
        if ctx.lookup_write(oid).is_some() {
            return ctx.record_write(oid.clone(), payload, 0, false);
        }

        let entry = self.cache.get(oid)?;
        let base_version = ctx.lookup_read(oid).unwrap_or_else(|| entry.version());
        if !ctx.holds_pin(oid) {
            self.cache.register_write(&entry);
            ctx.record_pin(oid.clone());
        }
        ctx.record_write(oid.clone(), payload, base_version, false)
    }

    /// Create an object at `store` inside `ctx`
    ///
    /// The store assigns the object number now; the object becomes visible
    /// at version 1 when the transaction commits.
    pub fn create(
        &self,
        ctx: &mut TransactionContext,
        store: &StoreId,
        payload: Vec<u8>,
    ) -> TesseraResult<Oid> {
        ctx.ensure_active()?;
        let proxy = self.registry.resolve(store)?;
        let oid = Oid::new(store.clone(), proxy.allocate_onum()?);
        ctx.record_write(oid.clone(), payload, 0, true)?;
        debug!(target: "tessera::txn", txn = %ctx.txn_id, %oid, "Created object");
        Ok(oid)
    }

    // === Commit / abort ===

    /// Commit `ctx`
    ///
    /// # Errors
    ///
    /// - `Restart` on conflicts, unseen objects or unreachable stores. The
    ///   error carries the original id for [`Self::begin_restart`].
    /// - `TransactionFailed` if a store rejected the transaction.
    /// - `InvalidState` if `ctx` is not active.
    pub fn commit(&self, ctx: TransactionContext) -> TesseraResult<CommitOutcome> {
        if ctx.is_nested() {
            let (parent, duplicate_pins) = ctx.merge_into_parent()?;
            for oid in duplicate_pins {
                self.cache.unpin(&oid);
            }
            return Ok(CommitOutcome::Merged(parent));
        }
        self.commit_top_level(ctx).map(CommitOutcome::Committed)
    }

    /// Abort `ctx` without contacting any store
    ///
    /// Returns the parent for nested contexts.
    pub fn abort(&self, mut ctx: TransactionContext) -> TesseraResult<Option<TransactionContext>> {
        if ctx.is_nested() {
            let (parent, pins) = ctx.discard_into_parent();
            for oid in pins {
                self.cache.unpin(&oid);
            }
            return Ok(parent);
        }

        if let Err(e) = ctx.mark_aborted() {
            self.release_pins(&mut ctx);
            self.finish();
            return Err(e);
        }
        self.release_pins(&mut ctx);
        self.finish();
        self.total_aborted.fetch_add(1, Ordering::Relaxed);
        debug!(target: "tessera::txn", txn = %ctx.txn_id, "Aborted by caller");
        Ok(None)
    }

    fn commit_top_level(&self, mut ctx: TransactionContext) -> TesseraResult<CommitReceipt> {
        // The context ends here either way; stop counting it as active.
        if let Err(e) = ctx.mark_preparing() {
            self.release_pins(&mut ctx);
            self.finish();
            return Err(e);
        }
        let txn_id = ctx.txn_id;
        let attempt = AttemptId::new();
        let partitions = ctx.partition(attempt);

        let mut stores = Vec::with_capacity(partitions.len());
        let mut participants = Vec::with_capacity(partitions.len());
        let mut unresolved = Vec::new();
        for (store_id, request) in partitions {
            match self.registry.resolve(&store_id) {
                Ok(store) => {
                    stores.push(store_id);
                    participants.push(Participant { store, request });
                }
                Err(e) => unresolved.push((store_id, e)),
            }
        }

        debug!(target: "tessera::txn", txn = %txn_id, %attempt, participants = participants.len(), reads = ctx.read_count(), writes = ctx.write_count(), "Preparing");
        let mut replies = prepare_all(&participants, self.prepare_timeout);
        for (store_id, e) in unresolved {
            stores.push(store_id);
            replies.push(Some(Err(e)));
        }
        let validation = validate_round(&stores, replies, self.prepare_timeout);

        if validation.is_valid() {
            let mut undelivered = Vec::new();
            for participant in &participants {
                if let Err(e) = participant.store.commit(participant.request.attempt) {
                    error!(target: "tessera::txn", txn = %txn_id, %attempt, store = %participant.store.id(), error = %e, "Commit phase failed at prepared store");
                    undelivered.push(participant.store.id().clone());
                }
            }

            // Shadows are only installed for stores that confirmed the commit.
            let mut versions = BTreeMap::new();
            for (oid, write) in &ctx.write_set {
                if undelivered.contains(&oid.store) {
                    continue;
                }
                let version = validation
                    .prepared
                    .get(&oid.store)
                    .and_then(|new_versions| new_versions.get(&oid.onum));
                if let Some(&version) = version {
                    self.cache.apply_commit(oid, version, write.payload.clone());
                    versions.insert(oid.clone(), version);
                }
            }

            self.release_pins(&mut ctx);
            self.finish();
            ctx.mark_finished(TransactionStatus::Committed)?;
            self.total_committed.fetch_add(1, Ordering::Relaxed);
            info!(target: "tessera::txn", txn = %txn_id, objects = versions.len(), "Transaction committed");
            return Ok(CommitReceipt {
                txn_id,
                versions,
                participants: participants.len(),
            });
        }

        for participant in &participants {
            if let Err(e) = participant.store.abort(participant.request.attempt) {
                warn!(target: "tessera::txn", txn = %txn_id, store = %participant.store.id(), error = %e, "Abort not delivered");
            }
        }

        let failures = validation.failures;
        for conflict in failures.conflicts.values() {
            self.cache.refresh(
                &conflict.oid,
                conflict.actual_version,
                conflict.actual_payload.clone(),
            );
        }
        self.release_pins(&mut ctx);
        self.finish();

        if failures.is_fatal() {
            ctx.mark_finished(TransactionStatus::AbortedFatal)?;
            self.total_failed.fetch_add(1, Ordering::Relaxed);
            warn!(target: "tessera::txn", txn = %txn_id, %failures, "Transaction failed");
            return Err(TesseraError::TransactionFailed {
                txn_id,
                failures: Box::new(failures),
            });
        }

        ctx.mark_finished(TransactionStatus::AbortedRestart)?;
        self.total_restarted.fetch_add(1, Ordering::Relaxed);
        let error = TesseraError::restart(txn_id, failures);
        warn!(target: "tessera::txn", txn = %txn_id, backoff = ?error.backoff_class(), error = %error, "Transaction aborted");
        Err(error)
    }

    fn release_pins(&self, ctx: &mut TransactionContext) {
        for oid in ctx.take_pinned() {
            self.cache.unpin(&oid);
        }
    }

    fn finish(&self) {
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }

    // === Stats ===

    /// Snapshot of transaction counters
    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            active_count: self.active_count.load(Ordering::Relaxed),
            total_started: self.total_started.load(Ordering::Relaxed),
            total_committed: self.total_committed.load(Ordering::Relaxed),
            total_restarted: self.total_restarted.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_aborted: self.total_aborted.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("prepare_timeout", &self.prepare_timeout)
            .field("stats", &self.stats())
            .finish()
    }
}
