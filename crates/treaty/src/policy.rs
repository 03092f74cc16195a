//! Enforcement policies
//!
//! A policy turns (statement, observation, now) into an expiry. The
//! computation is pure: the same inputs always give the same expiry.
//!
//! | Policy | Expiry |
//! |--------|--------|
//! | `Unenforced` | epoch (never valid) |
//! | `Lease { duration }` | `now + duration` while the statement holds |
//! | `Direct { max_lease, safety }` | `now + min(max_lease, safety * time to violation)` |
//!
//! Any policy yields `now` when the statement already fails.

use crate::metric::MetricObservation;
use crate::statement::TreatyStatement;
use std::time::Duration;
use tessera_core::Timestamp;

/// How a treaty's expiry is derived
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum EnforcementPolicy {
    /// Not enforced; the treaty is never valid
    #[default]
    Unenforced,
    /// Fixed-length lease
    Lease {
        /// Lease length
        duration: Duration,
    },
    /// Lease sized by how soon the metric could violate the statement
    Direct {
        /// Upper bound on the lease
        max_lease: Duration,
        /// Fraction of the predicted time to violation to grant, in (0, 1]
        safety: f64,
    },
}

impl EnforcementPolicy {
    /// True for [`EnforcementPolicy::Unenforced`]
    pub fn is_unenforced(&self) -> bool {
        matches!(self, EnforcementPolicy::Unenforced)
    }

    /// Expiry implied by this policy at `now`
    pub fn compute_expiry(
        &self,
        statement: &TreatyStatement,
        observation: &MetricObservation,
        now: Timestamp,
    ) -> Timestamp {
        if self.is_unenforced() {
            return Timestamp::EPOCH;
        }
        if !statement.holds(observation.value, now) {
            return now;
        }
        match *self {
            EnforcementPolicy::Unenforced => Timestamp::EPOCH,
            EnforcementPolicy::Lease { duration } => now.saturating_add(duration),
            EnforcementPolicy::Direct { max_lease, safety } => {
                let lease = match statement.time_to_violation(
                    observation.value,
                    observation.velocity,
                    now,
                ) {
                    None => max_lease,
                    Some(secs) => {
                        let granted = secs * safety.clamp(0.0, 1.0);
                        if granted.is_finite() {
                            Duration::from_secs_f64(granted.clamp(0.0, max_lease.as_secs_f64()))
                        } else {
                            max_lease
                        }
                    }
                };
                now.saturating_add(lease)
            }
        }
    }
}
