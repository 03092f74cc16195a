//! Single-flight fetch slots
//!
//! The first `get` for an uncached oid becomes the leader and performs the
//! fetch; later callers park on the slot until the leader finishes. The
//! slot only signals completion. Followers re-read the table afterwards, so
//! a failed fetch is retried by whoever wakes first. The leader holds a
//! [`LeaderGuard`], which releases the slot even if the fetch panics.

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tessera_core::Oid;

pub(crate) type InFlight = Mutex<FxHashMap<Oid, Arc<FetchSlot>>>;

#[derive(Debug, Default)]
pub(crate) struct FetchSlot {
    done: Mutex<bool>,
    cond: Condvar,
}

impl FetchSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn complete(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }
}

/// A leader's claim on an in-flight fetch
///
/// Dropping it removes the slot from the in-flight map, then wakes the
/// followers.
pub(crate) struct LeaderGuard<'a> {
    in_flight: &'a InFlight,
    oid: &'a Oid,
    slot: Arc<FetchSlot>,
}

impl<'a> LeaderGuard<'a> {
    pub(crate) fn new(in_flight: &'a InFlight, oid: &'a Oid, slot: Arc<FetchSlot>) -> Self {
        Self {
            in_flight,
            oid,
            slot,
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(self.oid);
        self.slot.complete();
    }
}
