//! Metric treaties
//!
//! A [`MetricTreaty`] is an immutable value. Every state change (policy,
//! observers, activation, expiry) returns a new treaty; the old one stays
//! valid for whoever still holds it.
//!
//! # Update
//!
//! ```text
//! expiry' = policy.compute_expiry(statement, metric.observe(), now)
//! expiry' == expiry                   -> unchanged (borrowed)
//! async_extension || expiry' > now    -> adopt expiry'
//! otherwise                           -> fall back
//! ```
//!
//! Falling back demotes the treaty to the unenforced policy, deactivates it
//! and expires it at `now`, so readers stop relying on it and re-derive the
//! value themselves. A dropped metric always falls back.

use crate::metric::{Metric, MetricId};
use crate::policy::EnforcementPolicy;
use crate::statement::TreatyStatement;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};
use tessera_core::Timestamp;
use tracing::debug;

/// Identity of a treaty within its metric's set
pub type TreatyId = u64;

/// Time-bounded assertion about a metric
#[derive(Clone)]
pub struct MetricTreaty {
    metric: Weak<dyn Metric>,
    metric_id: MetricId,
    id: TreatyId,
    statement: TreatyStatement,
    policy: EnforcementPolicy,
    expiry: Timestamp,
    observers: Arc<BTreeSet<TreatyId>>,
    activated: bool,
}

impl MetricTreaty {
    /// Unenforced, inactive treaty with no observers
    pub fn new(metric: &Arc<dyn Metric>, id: TreatyId, statement: TreatyStatement) -> Self {
        Self::from_parts(
            Arc::downgrade(metric),
            metric.id(),
            id,
            statement,
            EnforcementPolicy::Unenforced,
            Timestamp::EPOCH,
            BTreeSet::new(),
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        metric: Weak<dyn Metric>,
        metric_id: MetricId,
        id: TreatyId,
        statement: TreatyStatement,
        policy: EnforcementPolicy,
        expiry: Timestamp,
        observers: BTreeSet<TreatyId>,
        activated: bool,
    ) -> Self {
        Self {
            metric,
            metric_id,
            id,
            statement,
            policy,
            expiry,
            observers: Arc::new(observers),
            activated,
        }
    }

    /// Treaty id
    pub fn id(&self) -> TreatyId {
        self.id
    }

    /// Id of the constrained metric
    pub fn metric_id(&self) -> MetricId {
        self.metric_id
    }

    /// The constrained metric, if it is still alive
    pub fn metric(&self) -> Option<Arc<dyn Metric>> {
        self.metric.upgrade()
    }

    /// Asserted predicate
    pub fn statement(&self) -> &TreatyStatement {
        &self.statement
    }

    /// Enforcement policy
    pub fn policy(&self) -> &EnforcementPolicy {
        &self.policy
    }

    /// Absolute expiry
    pub fn expiry(&self) -> Timestamp {
        self.expiry
    }

    /// Ids of treaties that depend on this one
    pub fn observers(&self) -> &BTreeSet<TreatyId> {
        &self.observers
    }

    /// True once activated
    pub fn is_activated(&self) -> bool {
        self.activated
    }

    /// True while `now` is strictly before the expiry
    pub fn valid_at(&self, now: Timestamp) -> bool {
        self.expiry > now
    }

    /// Same fields, ignoring expiry
    pub fn same_terms(&self, other: &MetricTreaty) -> bool {
        self.id == other.id
            && self.metric_id == other.metric_id
            && self.statement == other.statement
            && self.policy == other.policy
            && self.observers == other.observers
            && self.activated == other.activated
    }

    // === Derived treaties ===

    /// Activated copy
    pub fn activate(&self) -> Self {
        Self {
            activated: true,
            ..self.clone()
        }
    }

    /// Copy with `observer` added to the observers
    pub fn add_observer(&self, observer: TreatyId) -> Self {
        if self.observers.contains(&observer) {
            return self.clone();
        }
        let mut observers = (*self.observers).clone();
        observers.insert(observer);
        Self {
            observers: Arc::new(observers),
            ..self.clone()
        }
    }

    /// Copy with `observer` removed from the observers
    pub fn remove_observer(&self, observer: TreatyId) -> Self {
        if !self.observers.contains(&observer) {
            return self.clone();
        }
        let mut observers = (*self.observers).clone();
        observers.remove(&observer);
        Self {
            observers: Arc::new(observers),
            ..self.clone()
        }
    }

    /// Copy under `policy`, with the expiry recomputed at `now`
    pub fn with_policy(&self, policy: EnforcementPolicy, now: Timestamp) -> Self {
        let with_policy = Self {
            policy,
            ..self.clone()
        };
        match with_policy.update(true, now) {
            Cow::Borrowed(_) => with_policy,
            Cow::Owned(updated) => updated,
        }
    }

    /// Copy with an explicit expiry
    pub fn with_expiry(&self, expiry: Timestamp) -> Self {
        Self {
            expiry,
            ..self.clone()
        }
    }

    /// Recompute the expiry through the policy
    ///
    /// Returns the treaty unchanged (borrowed) when the expiry would not
    /// move. A fallen-back treaty stays as it is.
    pub fn update(&self, async_extension: bool, now: Timestamp) -> Cow<'_, MetricTreaty> {
        let Some(metric) = self.metric.upgrade() else {
            if self.is_fallen_back(now) {
                return Cow::Borrowed(self);
            }
            debug!(target: "tessera::treaty", treaty = self.id, metric = self.metric_id, "Metric dropped, falling back");
            return Cow::Owned(self.fallback(now));
        };

        if self.is_fallen_back(now) {
            return Cow::Borrowed(self);
        }

        let observation = metric.observe();
        let expiry = self
            .policy
            .compute_expiry(&self.statement, &observation, now);
        if expiry == self.expiry {
            return Cow::Borrowed(self);
        }
        if async_extension || expiry > now {
            return Cow::Owned(self.with_expiry(expiry));
        }

        debug!(target: "tessera::treaty", treaty = self.id, metric = self.metric_id, value = observation.value, "Statement cannot be extended, falling back");
        Cow::Owned(self.fallback(now))
    }

    fn is_fallen_back(&self, now: Timestamp) -> bool {
        self.policy.is_unenforced() && !self.activated && !self.valid_at(now)
    }

    fn fallback(&self, now: Timestamp) -> Self {
        Self {
            policy: EnforcementPolicy::Unenforced,
            activated: false,
            expiry: now,
            ..self.clone()
        }
    }
}

impl PartialEq for MetricTreaty {
    fn eq(&self, other: &Self) -> bool {
        self.same_terms(other) && self.expiry == other.expiry
    }
}

impl fmt::Debug for MetricTreaty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricTreaty")
            .field("id", &self.id)
            .field("metric", &self.metric_id)
            .field("statement", &self.statement)
            .field("policy", &self.policy)
            .field("expiry", &self.expiry)
            .field("observers", &self.observers)
            .field("activated", &self.activated)
            .finish()
    }
}
