//! Metric handles
//!
//! A treaty constrains a metric, a derived value with an observable rate
//! of change. Treaties only hold a weak handle: once the metric is dropped,
//! nothing can be enforced and the treaty falls back.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Identity of a metric
pub type MetricId = u64;

/// One sample of a metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricObservation {
    /// Current value
    pub value: f64,
    /// Estimated change per second
    pub velocity: f64,
}

impl MetricObservation {
    /// Sample with the given value and velocity
    pub fn new(value: f64, velocity: f64) -> Self {
        Self { value, velocity }
    }
}

/// A derived value treaties can be written against
pub trait Metric: Send + Sync {
    /// Stable identity
    fn id(&self) -> MetricId;

    /// Current value and velocity
    fn observe(&self) -> MetricObservation;
}

/// Metric whose observation is set explicitly
///
/// Useful wherever the value is computed elsewhere and pushed in.
pub struct SampledMetric {
    id: MetricId,
    sample: Mutex<MetricObservation>,
}

impl SampledMetric {
    /// Metric `id` starting at `value`, not moving
    pub fn new(id: MetricId, value: f64) -> Arc<Self> {
        Arc::new(Self {
            id,
            sample: Mutex::new(MetricObservation::new(value, 0.0)),
        })
    }

    /// Replace the current sample
    pub fn set(&self, value: f64, velocity: f64) {
        *self.sample.lock() = MetricObservation::new(value, velocity);
    }
}

impl Metric for SampledMetric {
    fn id(&self) -> MetricId {
        self.id
    }

    fn observe(&self) -> MetricObservation {
        *self.sample.lock()
    }
}

impl fmt::Debug for SampledMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampledMetric")
            .field("id", &self.id)
            .field("sample", &self.observe())
            .finish()
    }
}
