//! Cache rows
//!
//! A [`CacheEntry`] is the worker's shadow of one remote object plus the
//! bookkeeping the reclaimer needs:
//!
//! - `pins`: live transactions holding an uncommitted write on the object
//! - `read_link`: set on the first registered read, released when the row
//!   is cleared
//! - `cleared`: soft state; set by the reclaimer once nothing outside the
//!   cache table holds the entry, reset by the next `get`

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tessera_core::{Oid, VersionedObject};

/// Shadow copy of a remote object
#[derive(Debug)]
pub struct CacheEntry {
    oid: Oid,
    shadow: RwLock<VersionedObject>,
    pins: AtomicUsize,
    read_link: AtomicBool,
    cleared: AtomicBool,
}

impl CacheEntry {
    pub(crate) fn new(object: VersionedObject) -> Self {
        Self {
            oid: object.oid.clone(),
            shadow: RwLock::new(object),
            pins: AtomicUsize::new(0),
            read_link: AtomicBool::new(false),
            cleared: AtomicBool::new(false),
        }
    }

    /// Object identity
    pub fn oid(&self) -> &Oid {
        &self.oid
    }

    /// Copy of the current shadow
    pub fn snapshot(&self) -> VersionedObject {
        self.shadow.read().clone()
    }

    /// Version of the current shadow
    pub fn version(&self) -> u64 {
        self.shadow.read().version
    }

    /// Payload of the current shadow
    pub fn payload(&self) -> Vec<u8> {
        self.shadow.read().payload.clone()
    }

    /// Outstanding write pins
    pub fn pin_count(&self) -> usize {
        self.pins.load(Ordering::SeqCst)
    }

    /// True while some transaction holds an uncommitted write
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// True once a read has been registered and not yet released
    pub fn has_read_link(&self) -> bool {
        self.read_link.load(Ordering::SeqCst)
    }

    /// True if the reclaimer cleared the soft state
    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }

    pub(crate) fn pin(&self) -> usize {
        self.pins.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the remaining pin count
    pub(crate) fn unpin(&self) -> usize {
        let previous = self
            .pins
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |x| {
                Some(x.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Returns true if the link was newly set
    pub(crate) fn link_read(&self) -> bool {
        !self.read_link.swap(true, Ordering::SeqCst)
    }

    /// Clear the soft state. The read link goes first.
    pub(crate) fn clear(&self) -> bool {
        self.read_link.store(false, Ordering::SeqCst);
        !self.cleared.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn revive(&self) {
        self.cleared.store(false, Ordering::SeqCst);
    }

    /// Install a newer copy. Older versions are ignored.
    pub(crate) fn install(&self, version: u64, payload: Vec<u8>) -> bool {
        let mut shadow = self.shadow.write();
        if version < shadow.version {
            return false;
        }
        shadow.version = version;
        shadow.payload = payload;
        true
    }
}
