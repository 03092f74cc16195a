//! Per-object treaty pointer
//!
//! Treaty sets are immutable once published. The only mutable piece is the
//! pointer to an object's current set, which [`TreatyCell`] replaces
//! atomically.

use crate::extension::explain_extension;
use crate::set::TreatySet;
use parking_lot::RwLock;
use std::sync::Arc;
use tessera_core::Timestamp;
use tracing::{debug, trace};

/// Atomic reference to an object's current treaty set
pub struct TreatyCell {
    current: RwLock<Arc<TreatySet>>,
}

impl TreatyCell {
    /// Cell holding `set`
    pub fn new(set: TreatySet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
        }
    }

    /// Current set
    pub fn load(&self) -> Arc<TreatySet> {
        Arc::clone(&self.current.read())
    }

    /// Replace the current set unconditionally
    pub fn store(&self, set: TreatySet) {
        *self.current.write() = Arc::new(set);
    }

    /// Replace the current set if it is still `expected`
    ///
    /// Returns the set found in the cell when the swap does not happen.
    pub fn compare_and_swap(
        &self,
        expected: &Arc<TreatySet>,
        new: TreatySet,
    ) -> Result<Arc<TreatySet>, Arc<TreatySet>> {
        let mut current = self.current.write();
        if !Arc::ptr_eq(&current, expected) {
            return Err(Arc::clone(&current));
        }
        let new = Arc::new(new);
        *current = Arc::clone(&new);
        Ok(new)
    }

    /// Install `proposed` if it only extends the current set at `now`
    ///
    /// Refresh-only updates take this path instead of a transaction.
    /// Renewing a treaty that has already expired does not qualify.
    /// Returns `false` and leaves the cell untouched otherwise.
    pub fn try_extend(&self, proposed: TreatySet, now: Timestamp) -> bool {
        let mut current = self.current.write();
        match explain_extension(&current, &proposed, now) {
            Ok(()) => {
                trace!(target: "tessera::treaty", version = proposed.version(), "Treaty set extended");
                *current = Arc::new(proposed);
                true
            }
            Err(reason) => {
                debug!(target: "tessera::treaty", %reason, "Treaty set extension rejected");
                false
            }
        }
    }
}

impl Default for TreatyCell {
    fn default() -> Self {
        Self::new(TreatySet::empty())
    }
}

impl std::fmt::Debug for TreatyCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TreatyCell").field(&*self.load()).finish()
    }
}
