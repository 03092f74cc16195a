//! Transaction context
//!
//! A [`TransactionContext`] records what one transaction observed and what
//! it intends to write. It never talks to a store: reads and writes are
//! routed through [`TransactionManager`](crate::TransactionManager), which
//! consults the cache and records the access here.
//!
//! # Nesting
//!
//! A nested context owns its parent. Committing the child folds its sets
//! into the parent and hands the parent back; aborting it drops the child's
//! sets and hands the parent back unchanged. Lookups walk the chain, so a
//! child sees its ancestors' uncommitted writes.
//!
//! # Lifecycle
//!
//! ```text
//! Active ──► Preparing ──► Committed
//!                     ├──► AbortedRestart
//!                     └──► AbortedFatal
//! Active ──► Aborted
//! ```

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tessera_core::{
    AttemptId, Oid, PrepareRequest, PrepareWrite, StoreId, TesseraError, TesseraResult, TransactionId,
};

/// Status of a transaction in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// Executing; reads and writes are accepted
    Active,
    /// Prepare requests are out
    Preparing,
    /// Every participant committed
    Committed,
    /// Aborted by conflicts, unseen objects or unreachable stores; the
    /// same logical transaction should be retried
    AbortedRestart,
    /// Aborted by an unrecoverable participant failure
    AbortedFatal,
    /// Aborted by the caller
    Aborted,
}

impl TransactionStatus {
    /// True for states no transition leaves
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Active | TransactionStatus::Preparing)
    }
}

/// Pending write of one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEntry {
    /// Payload to install
    pub payload: Vec<u8>,
    /// Version the write is based on (0 for created objects)
    pub base_version: u64,
    /// True if the object was created in this transaction
    pub created: bool,
}

/// Read and write sets of one (possibly nested) transaction
#[derive(Debug)]
pub struct TransactionContext {
    /// Transaction id; nested contexts share their root's id
    pub txn_id: TransactionId,
    /// Objects read and the version first observed
    pub read_set: FxHashMap<Oid, u64>,
    /// Objects written
    pub write_set: FxHashMap<Oid, WriteEntry>,
    /// Current status
    pub status: TransactionStatus,
    parent: Option<Box<TransactionContext>>,
    pinned: FxHashSet<Oid>,
    start_time: Instant,
}

impl TransactionContext {
    /// Fresh top-level context
    pub fn new(txn_id: TransactionId) -> Self {
        Self {
            txn_id,
            read_set: FxHashMap::default(),
            write_set: FxHashMap::default(),
            status: TransactionStatus::Active,
            parent: None,
            pinned: FxHashSet::default(),
            start_time: Instant::now(),
        }
    }

    /// Child context nested in `parent`
    ///
    /// # Errors
    ///
    /// `InvalidState` if `parent` is not active.
    pub fn nested(parent: TransactionContext) -> TesseraResult<Self> {
        parent.ensure_active()?;
        let mut child = Self::new(parent.txn_id);
        child.parent = Some(Box::new(parent));
        Ok(child)
    }

    /// Enclosing context, if nested
    pub fn parent(&self) -> Option<&TransactionContext> {
        self.parent.as_deref()
    }

    /// True if this context has a parent
    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    /// Nesting depth (0 for top level)
    pub fn depth(&self) -> usize {
        self.parent.as_ref().map_or(0, |p| p.depth() + 1)
    }

    // === Chain lookups ===

    /// Pending write for `oid` in this context or any ancestor
    pub fn lookup_write(&self, oid: &Oid) -> Option<&WriteEntry> {
        self.write_set
            .get(oid)
            .or_else(|| self.parent.as_ref()?.lookup_write(oid))
    }

    /// Version of `oid` first observed in this context or any ancestor
    pub fn lookup_read(&self, oid: &Oid) -> Option<u64> {
        if let Some(parent) = &self.parent {
            if let Some(version) = parent.lookup_read(oid) {
                return Some(version);
            }
        }
        self.read_set.get(oid).copied()
    }

    /// True if `oid` is pinned by this context or any ancestor
    pub fn holds_pin(&self, oid: &Oid) -> bool {
        self.pinned.contains(oid) || self.parent.as_ref().is_some_and(|p| p.holds_pin(oid))
    }

    // === Recording ===

    /// Record a read of `oid` at `version`
    ///
    /// The first observation in the chain wins; later reads of the same
    /// object do not move it.
    pub fn record_read(&mut self, oid: Oid, version: u64) -> TesseraResult<()> {
        self.ensure_active()?;
        if self.lookup_read(&oid).is_none() {
            self.read_set.insert(oid, version);
        }
        Ok(())
    }

    /// Record a write of `oid` based on `base_version`
    ///
    /// Rewriting an object keeps the base version and created flag of the
    /// earliest write in the chain.
    pub fn record_write(
        &mut self,
        oid: Oid,
        payload: Vec<u8>,
        base_version: u64,
        created: bool,
    ) -> TesseraResult<()> {
        self.ensure_active()?;
        let (base_version, created) = match self.lookup_write(&oid) {
            Some(earlier) => (earlier.base_version, earlier.created),
            None => (base_version, created),
        };
        self.write_set.insert(
            oid,
            WriteEntry {
                payload,
                base_version,
                created,
            },
        );
        Ok(())
    }

    /// Remember that this context pinned `oid`
    pub fn record_pin(&mut self, oid: Oid) {
        self.pinned.insert(oid);
    }

    /// Objects pinned by this context (not its ancestors)
    pub fn pinned(&self) -> impl Iterator<Item = &Oid> {
        self.pinned.iter()
    }

    pub(crate) fn take_pinned(&mut self) -> Vec<Oid> {
        self.pinned.drain().collect()
    }

    // === Nesting ===

    /// Fold this child's sets into its parent and return the parent
    ///
    /// Returns the oids the child pinned that the parent already held, so
    /// the caller can release the duplicate pins.
    pub(crate) fn merge_into_parent(mut self) -> TesseraResult<(TransactionContext, Vec<Oid>)> {
        self.ensure_active()?;
        let Some(mut parent) = self.parent.take().map(|p| *p) else {
            return Err(TesseraError::InvalidState(format!(
                "{} is not nested",
                self.txn_id
            )));
        };

        for (oid, version) in self.read_set {
            parent.read_set.entry(oid).or_insert(version);
        }
        for (oid, write) in self.write_set {
            parent.write_set.insert(oid, write);
        }
        let mut duplicate_pins = Vec::new();
        for oid in self.pinned {
            if parent.holds_pin(&oid) {
                duplicate_pins.push(oid);
            } else {
                parent.pinned.insert(oid);
            }
        }
        Ok((parent, duplicate_pins))
    }

    /// Drop this child's sets and return the parent with its pins
    pub(crate) fn discard_into_parent(mut self) -> (Option<TransactionContext>, Vec<Oid>) {
        let pins = self.take_pinned();
        (self.parent.take().map(|p| *p), pins)
    }

    // === Commit partitioning ===

    /// Split the read and write sets into one prepare request per store
    ///
    /// Every read is included, also for read-only transactions. Cached
    /// reads are not a consistent snapshot, so they must be validated.
    /// All requests belong to the round identified by `attempt`.
    pub fn partition(&self, attempt: AttemptId) -> BTreeMap<StoreId, PrepareRequest> {
        let mut partitions: BTreeMap<StoreId, PrepareRequest> = BTreeMap::new();

        for (oid, write) in &self.write_set {
            partitions
                .entry(oid.store.clone())
                .or_insert_with(|| PrepareRequest::for_attempt(self.txn_id, attempt))
                .writes
                .push(PrepareWrite {
                    onum: oid.onum,
                    expected_version: write.base_version,
                    payload: write.payload.clone(),
                });
        }
        for (oid, version) in &self.read_set {
            if self.write_set.contains_key(oid) {
                continue;
            }
            partitions
                .entry(oid.store.clone())
                .or_insert_with(|| PrepareRequest::for_attempt(self.txn_id, attempt))
                .reads
                .push((oid.onum, *version));
        }

        for request in partitions.values_mut() {
            request.writes.sort_by_key(|w| w.onum);
            request.reads.sort_unstable();
        }
        partitions
    }

    // === State ===

    /// Current status
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// True while reads and writes are accepted
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Fail unless active
    ///
    /// # Errors
    ///
    /// `InvalidState` if the context is past `Active`.
    pub fn ensure_active(&self) -> TesseraResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TesseraError::InvalidState(format!(
                "{} is not active: {:?}",
                self.txn_id, self.status
            )))
        }
    }

    /// `Active` → `Preparing`
    pub fn mark_preparing(&mut self) -> TesseraResult<()> {
        self.ensure_active()?;
        self.status = TransactionStatus::Preparing;
        Ok(())
    }

    /// `Preparing` → a terminal commit outcome
    pub(crate) fn mark_finished(&mut self, status: TransactionStatus) -> TesseraResult<()> {
        if self.status != TransactionStatus::Preparing {
            return Err(TesseraError::InvalidState(format!(
                "cannot finish {} from {:?}",
                self.txn_id, self.status
            )));
        }
        self.status = status;
        Ok(())
    }

    /// `Active` → `Aborted`; buffered writes are discarded
    pub fn mark_aborted(&mut self) -> TesseraResult<()> {
        self.ensure_active()?;
        self.status = TransactionStatus::Aborted;
        self.write_set.clear();
        Ok(())
    }

    /// Number of objects read at this level
    pub fn read_count(&self) -> usize {
        self.read_set.len()
    }

    /// Number of objects written at this level
    pub fn write_count(&self) -> usize {
        self.write_set.len()
    }

    /// True if nothing was written at this level
    pub fn is_read_only(&self) -> bool {
        self.write_set.is_empty()
    }

    /// Time since the context was created
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(store: &str, onum: u64) -> Oid {
        Oid::new(store.into(), onum)
    }

    fn ctx() -> TransactionContext {
        TransactionContext::new(TransactionId::new(1))
    }

    // === Lifecycle ===

    #[test]
    fn test_new_context_is_active() {
        let ctx = ctx();
        assert!(ctx.is_active());
        assert!(!ctx.is_nested());
        assert_eq!(ctx.depth(), 0);
        assert!(ctx.is_read_only());
    }

    #[test]
    fn test_state_transitions() {
        let mut ctx = ctx();
        ctx.mark_preparing().unwrap();
        assert!(ctx.record_read(oid("s", 1), 1).is_err());
        ctx.mark_finished(TransactionStatus::Committed).unwrap();
        assert!(ctx.status().is_terminal());
        assert!(ctx.mark_finished(TransactionStatus::AbortedRestart).is_err());
    }

    #[test]
    fn test_abort_discards_writes() {
        let mut ctx = ctx();
        ctx.record_write(oid("s", 1), vec![1], 3, false).unwrap();
        ctx.mark_aborted().unwrap();
        assert_eq!(ctx.status(), TransactionStatus::Aborted);
        assert_eq!(ctx.write_count(), 0);
        assert!(ctx.mark_aborted().is_err());
    }

    // === Recording ===

    #[test]
    fn test_first_read_version_wins() {
        let mut ctx = ctx();
        ctx.record_read(oid("s", 1), 5).unwrap();
        ctx.record_read(oid("s", 1), 6).unwrap();
        assert_eq!(ctx.lookup_read(&oid("s", 1)), Some(5));
    }

    #[test]
    fn test_rewrite_keeps_base_version() {
        let mut ctx = ctx();
        ctx.record_write(oid("s", 1), vec![1], 3, false).unwrap();
        ctx.record_write(oid("s", 1), vec![2], 9, false).unwrap();
        let write = ctx.lookup_write(&oid("s", 1)).unwrap();
        assert_eq!(write.base_version, 3);
        assert_eq!(write.payload, vec![2]);
    }

    // === Nesting ===

    #[test]
    fn test_child_sees_parent_writes() {
        let mut parent = ctx();
        parent.record_write(oid("s", 1), vec![1], 2, false).unwrap();
        let child = TransactionContext::nested(parent).unwrap();

        assert_eq!(child.depth(), 1);
        assert_eq!(child.txn_id, TransactionId::new(1));
        assert_eq!(child.lookup_write(&oid("s", 1)).unwrap().payload, vec![1]);
    }

    #[test]
    fn test_merge_into_parent() {
        let mut parent = ctx();
        parent.record_read(oid("s", 1), 4).unwrap();
        parent.record_pin(oid("s", 2));

        let mut child = TransactionContext::nested(parent).unwrap();
        child.record_read(oid("s", 1), 7).unwrap();
        child.record_read(oid("s", 3), 1).unwrap();
        child.record_write(oid("s", 2), vec![9], 1, false).unwrap();
        child.record_pin(oid("s", 2));
        child.record_pin(oid("s", 4));

        let (parent, duplicates) = child.merge_into_parent().unwrap();
        assert!(!parent.is_nested());
        assert_eq!(parent.read_set[&oid("s", 1)], 4);
        assert_eq!(parent.read_set[&oid("s", 3)], 1);
        assert_eq!(parent.write_set[&oid("s", 2)].payload, vec![9]);
        assert_eq!(duplicates, vec![oid("s", 2)]);
        assert!(parent.holds_pin(&oid("s", 4)));
    }

    #[test]
    fn test_discard_returns_untouched_parent() {
        let parent = ctx();
        let mut child = TransactionContext::nested(parent).unwrap();
        child.record_write(oid("s", 1), vec![1], 1, false).unwrap();
        child.record_pin(oid("s", 1));

        let (parent, pins) = child.discard_into_parent();
        let parent = parent.unwrap();
        assert_eq!(parent.write_count(), 0);
        assert_eq!(pins, vec![oid("s", 1)]);
    }

    #[test]
    fn test_merge_top_level_is_invalid() {
        let err = ctx().merge_into_parent().err().unwrap();
        assert!(matches!(err, TesseraError::InvalidState(_)));
    }

    // === Partitioning ===

    #[test]
    fn test_partition_by_store() {
        let mut ctx = ctx();
        ctx.record_read(oid("a", 1), 5).unwrap();
        ctx.record_read(oid("b", 2), 1).unwrap();
        ctx.record_read(oid("b", 3), 2).unwrap();
        ctx.record_write(oid("b", 3), vec![7], 2, false).unwrap();
        ctx.record_write(oid("c", 10), vec![1], 0, true).unwrap();

        let attempt = AttemptId::new();
        let partitions = ctx.partition(attempt);
        assert_eq!(partitions.len(), 3);
        assert!(partitions.values().all(|r| r.attempt == attempt));

        let a = &partitions[&StoreId::new("a")];
        assert!(a.is_read_only());
        assert_eq!(a.reads, vec![(1, 5)]);

        let b = &partitions[&StoreId::new("b")];
        assert_eq!(b.reads, vec![(2, 1)]);
        assert_eq!(b.writes.len(), 1);
        assert_eq!(b.writes[0].expected_version, 2);

        let c = &partitions[&StoreId::new("c")];
        assert_eq!(c.writes[0].expected_version, 0);
    }

    #[test]
    fn test_empty_context_has_no_partitions() {
        assert!(ctx().partition(AttemptId::new()).is_empty());
    }
}
