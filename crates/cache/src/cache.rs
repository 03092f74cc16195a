//! Worker object cache
//!
//! ## Row life cycle
//!
//! ```text
//! get (miss) ──► fetch (overlay, then store) ──► row inserted
//! register_write ──► pin += 1        unpin ──► pin -= 1
//! reclaim: no holder outside the table ──► clear (read link released)
//!          cleared && pins == 0        ──► row removed
//! get on a cleared row ──► revived
//! ```
//!
//! The table is the only structure shared by application threads and the
//! reclaimer. Every mutation of a row happens under that row's shard lock,
//! so a pin can never race with removal.

use crate::entry::CacheEntry;
use crate::fetch::{FetchSlot, InFlight, LeaderGuard};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::{
    GlobSource, Oid, StoreProxy, StoreRegistry, TesseraError, TesseraResult, VersionedObject,
};
use tracing::{debug, error, trace, warn};

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    store_fetches: AtomicU64,
    overlay_fetches: AtomicU64,
    overlay_rejections: AtomicU64,
    evictions: AtomicU64,
    cleared: AtomicU64,
    reclaimed: AtomicU64,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `get` calls answered from the table
    pub hits: u64,
    /// `get` calls that found no row
    pub misses: u64,
    /// Objects fetched from their store
    pub store_fetches: u64,
    /// Objects taken from the overlay after verification
    pub overlay_fetches: u64,
    /// Overlay blobs that failed verification
    pub overlay_rejections: u64,
    /// Rows removed by `evict`
    pub evictions: u64,
    /// Rows whose soft state the reclaimer cleared
    pub cleared: u64,
    /// Rows removed by the reclaimer
    pub reclaimed: u64,
}

/// Result of one reclamation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Rows cleared during this pass
    pub cleared: usize,
    /// Rows removed during this pass
    pub removed: usize,
}

/// Per-worker table of shadow objects
pub struct ObjectCache {
    registry: Arc<StoreRegistry>,
    overlay: Option<Arc<dyn GlobSource>>,
    table: DashMap<Oid, Arc<CacheEntry>>,
    in_flight: InFlight,
    counters: CacheCounters,
}

impl ObjectCache {
    /// Cache that fetches from the stores in `registry`
    pub fn new(registry: Arc<StoreRegistry>) -> Self {
        Self {
            registry,
            overlay: None,
            table: DashMap::new(),
            in_flight: Mutex::new(FxHashMap::default()),
            counters: CacheCounters::default(),
        }
    }

    /// Try `overlay` before each store fetch
    pub fn with_overlay(mut self, overlay: Arc<dyn GlobSource>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Store registry this cache fetches through
    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    /// Get the row for `oid`, fetching it if absent
    ///
    /// Concurrent calls for the same uncached oid perform a single fetch and
    /// all receive the same entry.
    ///
    /// # Errors
    ///
    /// Propagates `UnknownStore`, `NotFound` and `Unreachable` from the
    /// fetch path, and `Corruption` if the store returns a different object.
    pub fn get(&self, oid: &Oid) -> TesseraResult<Arc<CacheEntry>> {
        loop {
            if let Some(entry) = self.lookup(oid) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry);
            }

            let (slot, leader) = {
                let mut in_flight = self.in_flight.lock();
                // The leader inserts before it leaves the in-flight map.
                if let Some(entry) = self.lookup(oid) {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(entry);
                }
                match in_flight.get(oid) {
                    Some(slot) => (Arc::clone(slot), false),
                    None => {
                        let slot = Arc::new(FetchSlot::new());
                        in_flight.insert(oid.clone(), Arc::clone(&slot));
                        (slot, true)
                    }
                }
            };

            if !leader {
                trace!(target: "tessera::cache", %oid, "Waiting for in-flight fetch");
                slot.wait();
                continue;
            }

            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            let _leader = LeaderGuard::new(&self.in_flight, oid, slot);
            return self.fetch(oid).map(|object| {
                let fresh = Arc::new(CacheEntry::new(object));
                let row = self.table.entry(oid.clone()).or_insert(fresh);
                Arc::clone(row.value())
            });
        }
    }

    /// Row for `oid` without fetching
    pub fn peek(&self, oid: &Oid) -> Option<Arc<CacheEntry>> {
        self.table.get(oid).map(|row| Arc::clone(row.value()))
    }

    /// True if a row for `oid` is present
    pub fn contains(&self, oid: &Oid) -> bool {
        self.table.contains_key(oid)
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True if the table is empty
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Remove the row for `oid`
    ///
    /// Returns whether a row was present.
    ///
    /// # Errors
    ///
    /// `EvictPinned` if a transaction still holds an uncommitted write on
    /// the object. The row is kept.
    pub fn evict(&self, oid: &Oid) -> TesseraResult<bool> {
        let mut pins = 0;
        let removed = self.table.remove_if(oid, |_, entry| {
            pins = entry.pin_count();
            pins == 0
        });
        if removed.is_some() {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(target: "tessera::cache", %oid, "Evicted");
            return Ok(true);
        }
        if pins > 0 {
            error!(target: "tessera::cache", %oid, pins, "Evicting a pinned object");
            return Err(TesseraError::EvictPinned {
                oid: oid.clone(),
                pins,
            });
        }
        Ok(false)
    }

    /// Record a transactional read of `entry`
    ///
    /// The first read sets the entry's read link.
    pub fn register_read(&self, entry: &CacheEntry) {
        if entry.link_read() {
            trace!(target: "tessera::cache", oid = %entry.oid(), "Read link set");
        }
        entry.revive();
    }

    /// Pin `entry` for an uncommitted write
    ///
    /// If the row was removed since `entry` was obtained, `entry` is put
    /// back. Returns the pinned row.
    pub fn register_write(&self, entry: &Arc<CacheEntry>) -> Arc<CacheEntry> {
        let row = self
            .table
            .entry(entry.oid().clone())
            .or_insert_with(|| Arc::clone(entry));
        let pins = row.pin();
        row.revive();
        trace!(target: "tessera::cache", oid = %entry.oid(), pins, "Pinned");
        Arc::clone(row.value())
    }

    /// Release one write pin on `oid`
    pub fn unpin(&self, oid: &Oid) {
        match self.table.get(oid) {
            Some(row) => {
                let pins = row.unpin();
                trace!(target: "tessera::cache", %oid, pins, "Unpinned");
            }
            None => {
                warn!(target: "tessera::cache", %oid, "Unpin on a missing row");
            }
        }
    }

    /// Install the post-commit copy of an object
    pub fn apply_commit(&self, oid: &Oid, version: u64, payload: Vec<u8>) {
        self.install(oid, version, payload);
        trace!(target: "tessera::cache", %oid, version, "Shadow committed");
    }

    /// Install the authoritative copy returned with a version conflict
    pub fn refresh(&self, oid: &Oid, version: u64, payload: Vec<u8>) {
        self.install(oid, version, payload);
        debug!(target: "tessera::cache", %oid, version, "Shadow refreshed");
    }

    /// Run one reclamation pass
    ///
    /// Rows that nothing outside the table holds get their soft state
    /// cleared (releasing the read link). Cleared rows with no pins are
    /// removed. Each row is handled under its own shard lock.
    pub fn reclaim(&self) -> ReclaimReport {
        let candidates: Vec<Oid> = self
            .table
            .iter()
            .filter(|row| Arc::strong_count(row.value()) == 1)
            .map(|row| row.key().clone())
            .collect();

        let mut report = ReclaimReport::default();
        for oid in candidates {
            let removed = self.table.remove_if(&oid, |_, entry| {
                if Arc::strong_count(entry) > 1 {
                    return false;
                }
                if entry.clear() {
                    report.cleared += 1;
                }
                entry.pin_count() == 0
            });
            if removed.is_some() {
                report.removed += 1;
            }
        }

        self.counters
            .cleared
            .fetch_add(report.cleared as u64, Ordering::Relaxed);
        self.counters
            .reclaimed
            .fetch_add(report.removed as u64, Ordering::Relaxed);
        if report.removed > 0 || report.cleared > 0 {
            debug!(target: "tessera::cache", cleared = report.cleared, removed = report.removed, "Reclaimed");
        }
        report
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            store_fetches: c.store_fetches.load(Ordering::Relaxed),
            overlay_fetches: c.overlay_fetches.load(Ordering::Relaxed),
            overlay_rejections: c.overlay_rejections.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            cleared: c.cleared.load(Ordering::Relaxed),
            reclaimed: c.reclaimed.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, oid: &Oid) -> Option<Arc<CacheEntry>> {
        let entry = self.table.get(oid).map(|row| Arc::clone(row.value()))?;
        entry.revive();
        Some(entry)
    }

    fn install(&self, oid: &Oid, version: u64, payload: Vec<u8>) {
        match self.table.entry(oid.clone()) {
            Entry::Occupied(row) => {
                row.get().install(version, payload);
            }
            Entry::Vacant(slot) => {
                let object = VersionedObject::new(oid.clone(), version, payload);
                slot.insert(Arc::new(CacheEntry::new(object)));
            }
        }
    }

    fn fetch(&self, oid: &Oid) -> TesseraResult<VersionedObject> {
        let store = self.registry.resolve(&oid.store)?;

        if let Some(object) = self.fetch_from_overlay(store.as_ref(), oid) {
            self.counters.overlay_fetches.fetch_add(1, Ordering::Relaxed);
            debug!(target: "tessera::cache", %oid, version = object.version, "Fetched from overlay");
            return Ok(object);
        }

        let object = store.fetch(oid.onum)?;
        self.counters.store_fetches.fetch_add(1, Ordering::Relaxed);
        if object.oid != *oid {
            return Err(TesseraError::corruption(
                oid.to_string(),
                format!("store returned {}", object.oid),
            ));
        }
        debug!(target: "tessera::cache", %oid, version = object.version, "Fetched from store");
        Ok(object)
    }

    fn fetch_from_overlay(&self, store: &dyn StoreProxy, oid: &Oid) -> Option<VersionedObject> {
        let overlay = self.overlay.as_ref()?;
        let public_key = store.public_key()?;
        let glob = overlay.fetch_glob(&oid.store, oid.onum)?;
        if glob.oid != *oid {
            self.counters
                .overlay_rejections
                .fetch_add(1, Ordering::Relaxed);
            warn!(target: "tessera::cache", %oid, carried = %glob.oid, "Overlay returned a different object");
            return None;
        }
        match glob.open(&public_key) {
            Ok(object) => Some(object),
            Err(e) => {
                self.counters
                    .overlay_rejections
                    .fetch_add(1, Ordering::Relaxed);
                warn!(target: "tessera::cache", %oid, error = %e, "Rejected overlay blob, falling back to store");
                None
            }
        }
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("rows", &self.table.len())
            .field("overlay", &self.overlay.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}
