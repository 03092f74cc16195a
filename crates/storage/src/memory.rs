//! In-memory store
//!
//! `MemoryStore` is the authority for the objects it owns: it assigns
//! object numbers, bumps versions, and validates prepares.
//!
//! # Prepare semantics
//!
//! ```text
//! read  (onum, v)  : conflict if committed version != v, unseen if unknown
//! write (onum, v)  : conflict if committed version != v,
//!                    create if v == 0 and onum was allocated here,
//!                    unseen otherwise
//! locked by another prepared transaction : conflict
//! ```
//!
//! A successful prepare stages the writes and locks the written objects,
//! both under the request's attempt id. Nothing becomes visible until
//! `commit`. `abort` and a re-prepare of the same attempt drop the staged
//! writes; other attempts of the same transaction are left alone.

use crate::overlay::MemoryOverlay;
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{
    AttemptId, Oid, PrepareOutcome, PrepareRequest, PrepareWrite, SignedGlob, StoreId,
    StoreProxy, TesseraError, TesseraResult, TransactionId, VersionConflict, VersionedObject,
};
use tracing::{debug, trace, warn};

/// RPC counters, for observing traffic in tests
#[derive(Debug, Default)]
pub struct StoreCounters {
    /// `fetch` calls that reached the store
    pub fetches: AtomicU64,
    /// `prepare` calls that reached the store
    pub prepares: AtomicU64,
    /// `commit` calls that reached the store
    pub commits: AtomicU64,
    /// `abort` calls that reached the store
    pub aborts: AtomicU64,
}

#[derive(Debug)]
struct Staged {
    txn_id: TransactionId,
    writes: Vec<PrepareWrite>,
    new_versions: BTreeMap<u64, u64>,
}

#[derive(Debug, Default)]
struct StoreState {
    objects: FxHashMap<u64, VersionedObject>,
    allocated: FxHashSet<u64>,
    staged: FxHashMap<AttemptId, Staged>,
    locks: FxHashMap<u64, AttemptId>,
}

impl StoreState {
    fn release(&mut self, attempt: AttemptId) -> Option<Staged> {
        let staged = self.staged.remove(&attempt)?;
        for write in &staged.writes {
            if self.locks.get(&write.onum) == Some(&attempt) {
                self.locks.remove(&write.onum);
            }
        }
        Some(staged)
    }
}

/// A store that keeps its objects in memory
pub struct MemoryStore {
    id: StoreId,
    state: Mutex<StoreState>,
    next_onum: AtomicU64,
    signing_key: Option<SigningKey>,
    overlay: Option<Arc<MemoryOverlay>>,
    reachable: AtomicBool,
    prepare_delay_ms: AtomicU64,
    fetch_delay_ms: AtomicU64,
    forced_failure: Mutex<Option<String>>,
    counters: StoreCounters,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(id: impl Into<StoreId>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(StoreState::default()),
            next_onum: AtomicU64::new(1),
            signing_key: None,
            overlay: None,
            reachable: AtomicBool::new(true),
            prepare_delay_ms: AtomicU64::new(0),
            fetch_delay_ms: AtomicU64::new(0),
            forced_failure: Mutex::new(None),
            counters: StoreCounters::default(),
        }
    }

    /// Sign committed objects with `key` and publish them to `overlay`
    pub fn with_overlay(mut self, key: SigningKey, overlay: Arc<MemoryOverlay>) -> Self {
        self.signing_key = Some(key);
        self.overlay = Some(overlay);
        self
    }

    /// Create an object directly, bypassing the transaction path
    ///
    /// Used to seed a store. The object starts at version 1.
    pub fn seed(&self, payload: impl Into<Vec<u8>>) -> VersionedObject {
        let onum = self.next_onum.fetch_add(1, Ordering::SeqCst);
        let object = VersionedObject::new(Oid::new(self.id.clone(), onum), 1, payload.into());
        self.state.lock().objects.insert(onum, object.clone());
        self.publish(&object);
        object
    }

    /// Committed copy of an object
    pub fn committed(&self, onum: u64) -> Option<VersionedObject> {
        self.state.lock().objects.get(&onum).cloned()
    }

    /// Number of attempts with staged (prepared, uncommitted) writes
    pub fn staged_count(&self) -> usize {
        self.state.lock().staged.len()
    }

    /// Number of objects locked by prepared transactions
    pub fn locked_count(&self) -> usize {
        self.state.lock().locks.len()
    }

    /// Make every RPC fail with `Unreachable` (or succeed again)
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay every prepare by `delay`
    pub fn set_prepare_delay(&self, delay: Duration) {
        self.prepare_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay every fetch by `delay`
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Reject every prepare with an unrecoverable failure (or stop doing so)
    pub fn fail_prepares(&self, reason: Option<String>) {
        *self.forced_failure.lock() = reason;
    }

    /// RPC counters
    pub fn counters(&self) -> &StoreCounters {
        &self.counters
    }

    fn check_reachable(&self) -> TesseraResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TesseraError::Unreachable {
                store: self.id.clone(),
                reason: "connection refused".to_string(),
            })
        }
    }

    fn delay(&self, millis: &AtomicU64) {
        let ms = millis.load(Ordering::SeqCst);
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }

    fn oid(&self, onum: u64) -> Oid {
        Oid::new(self.id.clone(), onum)
    }

    fn publish(&self, object: &VersionedObject) {
        let (Some(key), Some(overlay)) = (&self.signing_key, &self.overlay) else {
            return;
        };
        match SignedGlob::seal(object, key) {
            Ok(glob) => overlay.publish(glob),
            Err(e) => warn!(target: "tessera::store", oid = %object.oid, error = %e, "Failed to seal glob"),
        }
    }

    fn validate(
        &self,
        state: &StoreState,
        request: &PrepareRequest,
    ) -> (Vec<VersionConflict>, Vec<u64>) {
        let mut conflicts = Vec::new();
        let mut unseen = Vec::new();

        let locked_elsewhere = |onum: u64| {
            state
                .locks
                .get(&onum)
                .is_some_and(|holder| *holder != request.attempt)
        };

        for &(onum, read_version) in &request.reads {
            match state.objects.get(&onum) {
                Some(current) if current.version != read_version || locked_elsewhere(onum) => {
                    conflicts.push(VersionConflict {
                        oid: self.oid(onum),
                        expected_version: read_version,
                        actual_version: current.version,
                        actual_payload: current.payload.clone(),
                    });
                }
                Some(_) => {}
                None if read_version == 0 && state.allocated.contains(&onum) => {}
                None => unseen.push(onum),
            }
        }

        for write in &request.writes {
            match state.objects.get(&write.onum) {
                Some(current)
                    if current.version != write.expected_version
                        || locked_elsewhere(write.onum) =>
                {
                    if !conflicts.iter().any(|c| c.oid.onum == write.onum) {
                        conflicts.push(VersionConflict {
                            oid: self.oid(write.onum),
                            expected_version: write.expected_version,
                            actual_version: current.version,
                            actual_payload: current.payload.clone(),
                        });
                    }
                }
                Some(_) => {}
                None if write.expected_version == 0
                    && state.allocated.contains(&write.onum)
                    && !locked_elsewhere(write.onum) => {}
                None => unseen.push(write.onum),
            }
        }

        (conflicts, unseen)
    }
}

impl StoreProxy for MemoryStore {
    fn id(&self) -> &StoreId {
        &self.id
    }

    fn fetch(&self, onum: u64) -> TesseraResult<VersionedObject> {
        self.check_reachable()?;
        self.delay(&self.fetch_delay_ms);
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        trace!(target: "tessera::store", store = %self.id, onum, "Fetch");

        self.committed(onum).ok_or_else(|| TesseraError::NotFound {
            oid: self.oid(onum),
        })
    }

    fn allocate_onum(&self) -> TesseraResult<u64> {
        self.check_reachable()?;
        let onum = self.next_onum.fetch_add(1, Ordering::SeqCst);
        self.state.lock().allocated.insert(onum);
        Ok(onum)
    }

    fn prepare(&self, request: &PrepareRequest) -> TesseraResult<PrepareOutcome> {
        self.check_reachable()?;
        self.delay(&self.prepare_delay_ms);
        self.counters.prepares.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self.forced_failure.lock().clone() {
            return Ok(PrepareOutcome::Failed(reason));
        }

        let mut state = self.state.lock();
        // A re-sent prepare replaces what this attempt staged before.
        state.release(request.attempt);

        let (conflicts, unseen) = self.validate(&state, request);
        if !conflicts.is_empty() {
            debug!(target: "tessera::store", store = %self.id, txn = %request.txn_id, conflicts = conflicts.len(), "Prepare rejected");
            return Ok(PrepareOutcome::Conflict(conflicts));
        }
        if !unseen.is_empty() {
            debug!(target: "tessera::store", store = %self.id, txn = %request.txn_id, unseen = unseen.len(), "Prepare rejected");
            return Ok(PrepareOutcome::Unseen(unseen));
        }

        let mut new_versions = BTreeMap::new();
        for write in &request.writes {
            let current = state.objects.get(&write.onum).map_or(0, |o| o.version);
            new_versions.insert(write.onum, current + 1);
            state.locks.insert(write.onum, request.attempt);
        }
        state.staged.insert(
            request.attempt,
            Staged {
                txn_id: request.txn_id,
                writes: request.writes.clone(),
                new_versions: new_versions.clone(),
            },
        );

        debug!(target: "tessera::store", store = %self.id, txn = %request.txn_id, attempt = %request.attempt, writes = request.writes.len(), "Prepared");
        Ok(PrepareOutcome::Prepared { new_versions })
    }

    fn commit(&self, attempt: AttemptId) -> TesseraResult<()> {
        self.check_reachable()?;
        self.counters.commits.fetch_add(1, Ordering::SeqCst);

        let (txn_id, committed) = {
            let mut state = self.state.lock();
            let Some(staged) = state.release(attempt) else {
                warn!(target: "tessera::store", store = %self.id, %attempt, "Commit for unknown attempt");
                return Err(TesseraError::InvalidState(format!(
                    "store {} has nothing staged for {}",
                    self.id, attempt
                )));
            };
            let mut committed = Vec::with_capacity(staged.writes.len());
            for write in staged.writes {
                let version = staged.new_versions[&write.onum];
                let object = VersionedObject::new(self.oid(write.onum), version, write.payload);
                state.allocated.remove(&write.onum);
                state.objects.insert(write.onum, object.clone());
                committed.push(object);
            }
            (staged.txn_id, committed)
        };

        for object in &committed {
            self.publish(object);
        }
        debug!(target: "tessera::store", store = %self.id, txn = %txn_id, objects = committed.len(), "Committed");
        Ok(())
    }

    fn abort(&self, attempt: AttemptId) -> TesseraResult<()> {
        self.check_reachable()?;
        self.counters.aborts.fetch_add(1, Ordering::SeqCst);
        if let Some(staged) = self.state.lock().release(attempt) {
            debug!(target: "tessera::store", store = %self.id, txn = %staged.txn_id, %attempt, "Aborted");
        }
        Ok(())
    }

    fn public_key(&self) -> Option<[u8; 32]> {
        self.signing_key
            .as_ref()
            .map(|key| key.verifying_key().to_bytes())
    }
}
