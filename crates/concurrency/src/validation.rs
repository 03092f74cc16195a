//! Prepare-round validation
//!
//! Folds the per-store replies of one prepare round into a single verdict:
//! either every participant prepared, or a [`CommitFailures`] with each
//! failing store attributed.
//!
//! | Reply | Recorded as | Backoff |
//! |-------|-------------|---------|
//! | `Prepared` | success | - |
//! | `Conflict` | conflicts | NonExponential |
//! | `Unseen` | unseen oids | None |
//! | `Failed` | rejection (fatal) | None |
//! | `Err(UnknownStore)` | rejection (fatal) | None |
//! | `Err(_)` or no reply | unreachable | Exponential |

use crate::prepare::Reply;
use std::collections::BTreeMap;
use std::time::Duration;
use tessera_core::{CommitFailures, Oid, PrepareOutcome, StoreId, TesseraError};

/// Result of validating one prepare round
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// New versions per prepared store
    pub prepared: BTreeMap<StoreId, BTreeMap<u64, u64>>,
    /// Everything that went wrong
    pub failures: CommitFailures,
}

impl ValidationResult {
    /// True if every participant prepared
    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Classify replies, given in the same order as `stores`
pub(crate) fn validate_round(
    stores: &[StoreId],
    replies: Vec<Reply>,
    timeout: Duration,
) -> ValidationResult {
    let mut result = ValidationResult::default();

    for (store, reply) in stores.iter().zip(replies) {
        match reply {
            Some(Ok(PrepareOutcome::Prepared { new_versions })) => {
                result.prepared.insert(store.clone(), new_versions);
            }
            Some(Ok(PrepareOutcome::Conflict(conflicts))) => {
                result.failures.record_conflicts(store, conflicts);
            }
            Some(Ok(PrepareOutcome::Unseen(onums))) => {
                let oids = onums
                    .into_iter()
                    .map(|onum| Oid::new(store.clone(), onum))
                    .collect();
                result.failures.record_unseen(store, oids);
            }
            Some(Ok(PrepareOutcome::Failed(reason))) => {
                result.failures.record_rejected(store, reason);
            }
            Some(Err(e @ TesseraError::UnknownStore(_))) => {
                result.failures.record_rejected(store, e.to_string());
            }
            Some(Err(e)) => {
                result.failures.record_unreachable(store, e.to_string());
            }
            None => {
                result.failures.record_unreachable(
                    store,
                    format!("no prepare reply within {}ms", timeout.as_millis()),
                );
            }
        }
    }

    result
}
