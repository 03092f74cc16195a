//! Treaty sets
//!
//! Every object carries exactly one [`TreatySet`]: either the permanently
//! empty sentinel, or the versioned collection of treaties on one metric.
//! Sets are values; every operation returns a new set and leaves the
//! receiver untouched. Operations that change nothing return a set sharing
//! the receiver's storage.

use crate::metric::{Metric, MetricId};
use crate::statement::TreatyStatement;
use crate::treaty::{MetricTreaty, TreatyId};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tessera_core::{TesseraError, TesseraResult, Timestamp};
use tracing::trace;

/// The treaties on one metric
#[derive(Clone)]
pub struct MetricTreaties {
    pub(crate) metric: Weak<dyn Metric>,
    pub(crate) metric_id: MetricId,
    pub(crate) next_id: TreatyId,
    pub(crate) version: u64,
    pub(crate) treaties: Arc<BTreeMap<TreatyId, MetricTreaty>>,
}

/// Versioned collection of treaties attached to one object
#[derive(Clone, Default)]
pub enum TreatySet {
    /// Permanently empty; accepts no treaties
    #[default]
    Empty,
    /// Treaties on one metric
    Metric(MetricTreaties),
}

impl TreatySet {
    /// The empty sentinel
    pub fn empty() -> Self {
        TreatySet::Empty
    }

    /// Empty collection for `metric`
    pub fn for_metric(metric: &Arc<dyn Metric>) -> Self {
        TreatySet::Metric(MetricTreaties {
            metric: Arc::downgrade(metric),
            metric_id: metric.id(),
            next_id: 0,
            version: 0,
            treaties: Arc::new(BTreeMap::new()),
        })
    }

    pub(crate) fn from_parts(
        metric: Weak<dyn Metric>,
        metric_id: MetricId,
        next_id: TreatyId,
        version: u64,
        treaties: BTreeMap<TreatyId, MetricTreaty>,
    ) -> Self {
        TreatySet::Metric(MetricTreaties {
            metric,
            metric_id,
            next_id,
            version,
            treaties: Arc::new(treaties),
        })
    }

    // === Accessors ===

    /// True for the sentinel
    pub fn is_sentinel(&self) -> bool {
        matches!(self, TreatySet::Empty)
    }

    /// Id of the metric, `None` for the sentinel
    pub fn metric_id(&self) -> Option<MetricId> {
        match self {
            TreatySet::Empty => None,
            TreatySet::Metric(m) => Some(m.metric_id),
        }
    }

    /// Set version; bumped by every change
    pub fn version(&self) -> u64 {
        match self {
            TreatySet::Empty => 0,
            TreatySet::Metric(m) => m.version,
        }
    }

    /// Id the next created treaty gets
    pub fn next_id(&self) -> TreatyId {
        match self {
            TreatySet::Empty => 0,
            TreatySet::Metric(m) => m.next_id,
        }
    }

    /// Number of treaties
    pub fn len(&self) -> usize {
        match self {
            TreatySet::Empty => 0,
            TreatySet::Metric(m) => m.treaties.len(),
        }
    }

    /// True if the set holds no treaty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Treaties in id order
    pub fn iter(&self) -> impl Iterator<Item = &MetricTreaty> {
        let treaties = match self {
            TreatySet::Empty => None,
            TreatySet::Metric(m) => Some(m.treaties.values()),
        };
        treaties.into_iter().flatten()
    }

    /// Treaty `id`, `None` once it has been collected
    pub fn get(&self, id: TreatyId) -> Option<&MetricTreaty> {
        match self {
            TreatySet::Empty => None,
            TreatySet::Metric(m) => m.treaties.get(&id),
        }
    }

    /// Treaty `id` if it is still valid at `now`
    ///
    /// An expired treaty that has not been collected yet is treated as
    /// absent.
    pub fn get_valid(&self, id: TreatyId, now: Timestamp) -> Option<&MetricTreaty> {
        self.get(id).filter(|t| t.valid_at(now))
    }

    /// True if both sets share storage
    pub fn ptr_eq(&self, other: &TreatySet) -> bool {
        match (self, other) {
            (TreatySet::Empty, TreatySet::Empty) => true,
            (TreatySet::Metric(a), TreatySet::Metric(b)) => {
                Arc::ptr_eq(&a.treaties, &b.treaties)
                    && a.version == b.version
                    && a.next_id == b.next_id
            }
            _ => false,
        }
    }

    // === Derived sets ===

    /// Create a treaty for `statement` under the default policy
    ///
    /// # Errors
    ///
    /// `InvalidState` on the sentinel.
    pub fn create(&self, statement: TreatyStatement) -> TesseraResult<(TreatySet, MetricTreaty)> {
        let m = self.metric_treaties("create")?;
        let treaty = MetricTreaty::from_parts(
            m.metric.clone(),
            m.metric_id,
            m.next_id,
            statement,
            Default::default(),
            Timestamp::EPOCH,
            Default::default(),
            false,
        );
        let mut treaties = (*m.treaties).clone();
        treaties.insert(treaty.id(), treaty.clone());
        trace!(target: "tessera::treaty", metric = m.metric_id, treaty = treaty.id(), %statement, "Treaty created");

        let set = TreatySet::from_parts(
            m.metric.clone(),
            m.metric_id,
            m.next_id + 1,
            m.version + 1,
            treaties,
        );
        Ok((set, treaty))
    }

    /// Insert or replace `treaty`
    ///
    /// Adding a treaty identical to the present one returns this set.
    ///
    /// # Errors
    ///
    /// `InvalidState` on the sentinel, or if the treaty constrains another
    /// metric.
    pub fn add(&self, treaty: MetricTreaty) -> TesseraResult<TreatySet> {
        let m = self.metric_treaties("add")?;
        if treaty.metric_id() != m.metric_id {
            return Err(TesseraError::InvalidState(format!(
                "treaty {} constrains metric {}, set belongs to {}",
                treaty.id(),
                treaty.metric_id(),
                m.metric_id
            )));
        }
        if m.treaties.get(&treaty.id()) == Some(&treaty) {
            return Ok(self.clone());
        }

        let next_id = m.next_id.max(treaty.id() + 1);
        let mut treaties = (*m.treaties).clone();
        treaties.insert(treaty.id(), treaty);
        Ok(TreatySet::from_parts(
            m.metric.clone(),
            m.metric_id,
            next_id,
            m.version + 1,
            treaties,
        ))
    }

    /// Remove treaty `id`
    pub fn remove(&self, id: TreatyId) -> TreatySet {
        self.retain(|t| t.id() != id)
    }

    /// Drop expired treaties nothing observes
    pub fn collect(&self, now: Timestamp) -> TreatySet {
        self.retain(|t| t.valid_at(now) || !t.observers().is_empty())
    }

    /// Run [`MetricTreaty::update`] on every treaty
    pub fn refresh_all(&self, async_extension: bool, now: Timestamp) -> TreatySet {
        let TreatySet::Metric(m) = self else {
            return self.clone();
        };

        let mut changed = false;
        let treaties: BTreeMap<TreatyId, MetricTreaty> = m
            .treaties
            .iter()
            .map(|(id, treaty)| {
                let updated = treaty.update(async_extension, now).into_owned();
                changed |= updated != *treaty;
                (*id, updated)
            })
            .collect();

        if !changed {
            return self.clone();
        }
        TreatySet::from_parts(
            m.metric.clone(),
            m.metric_id,
            m.next_id,
            m.version + 1,
            treaties,
        )
    }

    fn retain(&self, keep: impl Fn(&MetricTreaty) -> bool) -> TreatySet {
        let TreatySet::Metric(m) = self else {
            return self.clone();
        };
        if m.treaties.values().all(&keep) {
            return self.clone();
        }

        let treaties = m
            .treaties
            .iter()
            .filter(|(_, t)| keep(t))
            .map(|(id, t)| (*id, t.clone()))
            .collect();
        TreatySet::from_parts(
            m.metric.clone(),
            m.metric_id,
            m.next_id,
            m.version + 1,
            treaties,
        )
    }

    fn metric_treaties(&self, op: &str) -> TesseraResult<&MetricTreaties> {
        match self {
            TreatySet::Metric(m) => Ok(m),
            TreatySet::Empty => Err(TesseraError::InvalidState(format!(
                "cannot {} on the empty treaty set",
                op
            ))),
        }
    }
}

impl PartialEq for TreatySet {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TreatySet::Empty, TreatySet::Empty) => true,
            (TreatySet::Metric(a), TreatySet::Metric(b)) => {
                a.metric_id == b.metric_id
                    && a.next_id == b.next_id
                    && a.version == b.version
                    && a.treaties == b.treaties
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for TreatySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreatySet::Empty => f.write_str("TreatySet::Empty"),
            TreatySet::Metric(m) => f
                .debug_struct("TreatySet::Metric")
                .field("metric", &m.metric_id)
                .field("next_id", &m.next_id)
                .field("version", &m.version)
                .field("treaties", &m.treaties.values().collect::<Vec<_>>())
                .finish(),
        }
    }
}
