//! Metric treaties
//!
//! Treaties are time-bounded assertions about metrics that let workers rely
//! on a derived value without re-reading it:
//! - TreatyStatement / EnforcementPolicy: what is asserted and for how long
//! - MetricTreaty: one immutable treaty on one metric
//! - TreatySet / TreatyCell: an object's versioned treaties and the pointer
//!   to the current set
//! - check_extension: which replacements only lengthen existing promises
//! - ProxyMap: per-store remote handles for an owning entity
//! - codec: the big-endian wire layout of all of the above

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell;
pub mod codec;
pub mod extension;
pub mod metric;
pub mod policy;
pub mod proxy_map;
pub mod set;
pub mod statement;
pub mod treaty;

pub use cell::TreatyCell;
pub use codec::{CodecError, CodecResult};
pub use extension::{check_extension, check_extension_strict, explain_extension};
pub use metric::{Metric, MetricId, MetricObservation, SampledMetric};
pub use policy::EnforcementPolicy;
pub use proxy_map::{ProxyMap, RemoteRef};
pub use set::{MetricTreaties, TreatySet};
pub use statement::TreatyStatement;
pub use treaty::{MetricTreaty, TreatyId};
