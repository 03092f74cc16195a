//! Extension checks between treaty sets
//!
//! A proposed set `to` extends a current set `from` when accepting it can
//! only lengthen promises already made:
//!
//! ```text
//! from = Empty                 -> to must be Empty
//! from = Metric(m)             -> to is Metric on the same metric
//!                                 to.next_id == from.next_id
//!                                 every id in `to` already exists in `from`
//!                                 every treaty valid at `now` in `from`
//!                                   is in `to` with the same terms
//!                                   and an expiry no earlier
//!                                 every treaty expired at `now` in `from`
//!                                   is absent from `to` or carried over
//!                                   with the same terms and expiry
//! ```
//!
//! The strict check additionally rejects `to == from`.

use crate::set::TreatySet;
use tessera_core::Timestamp;

/// True if `to` is an extension of `from` at `now`
pub fn check_extension(from: &TreatySet, to: &TreatySet, now: Timestamp) -> bool {
    explain_extension(from, to, now).is_ok()
}

/// True if `to` is an extension of `from` at `now` and differs from it
pub fn check_extension_strict(from: &TreatySet, to: &TreatySet, now: Timestamp) -> bool {
    to != from && check_extension(from, to, now)
}

/// Why `to` is not an extension of `from` at `now`
pub fn explain_extension(from: &TreatySet, to: &TreatySet, now: Timestamp) -> Result<(), String> {
    let (f, t) = match (from, to) {
        (TreatySet::Empty, TreatySet::Empty) => return Ok(()),
        (TreatySet::Metric(f), TreatySet::Metric(t)) => (f, t),
        _ => return Err("treaty set kinds differ".to_string()),
    };

    if f.metric_id != t.metric_id {
        return Err(format!(
            "metric changed from {} to {}",
            f.metric_id, t.metric_id
        ));
    }
    if f.next_id != t.next_id {
        return Err(format!(
            "next treaty id changed from {} to {}",
            f.next_id, t.next_id
        ));
    }
    if let Some(id) = t.treaties.keys().find(|id| !f.treaties.contains_key(id)) {
        return Err(format!("treaty {} is new", id));
    }

    for (id, current) in f.treaties.iter() {
        if !current.valid_at(now) {
            match t.treaties.get(id) {
                Some(proposed) if proposed != current => {
                    return Err(format!("expired treaty {} was revived", id));
                }
                _ => continue,
            }
        }
        let proposed = t
            .treaties
            .get(id)
            .ok_or_else(|| format!("valid treaty {} was dropped", id))?;
        if !proposed.same_terms(current) {
            return Err(format!("valid treaty {} changed terms", id));
        }
        if proposed.expiry() < current.expiry() {
            return Err(format!(
                "valid treaty {} shortened from {} to {}",
                id,
                current.expiry(),
                proposed.expiry()
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Metric, SampledMetric};
    use crate::policy::EnforcementPolicy;
    use crate::statement::TreatyStatement;
    use std::sync::Arc;
    use std::time::Duration;

    fn lease(secs: u64) -> EnforcementPolicy {
        EnforcementPolicy::Lease {
            duration: Duration::from_secs(secs),
        }
    }

    fn leased_set(metric: &Arc<dyn Metric>, now: Timestamp) -> TreatySet {
        let set = TreatySet::for_metric(metric);
        let (set, treaty) = set.create(TreatyStatement::at_least(1.0)).unwrap();
        set.add(treaty.with_policy(lease(10), now)).unwrap()
    }

    #[test]
    fn test_reflexive() {
        let metric: Arc<dyn Metric> = SampledMetric::new(1, 5.0);
        let now = Timestamp::from_secs(100);
        let set = leased_set(&metric, now);
        assert!(check_extension(&set, &set, now));
        assert!(check_extension(&TreatySet::empty(), &TreatySet::empty(), now));
        assert!(!check_extension_strict(&set, &set, now));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let metric: Arc<dyn Metric> = SampledMetric::new(1, 5.0);
        let now = Timestamp::from_secs(100);
        let set = TreatySet::for_metric(&metric);
        assert!(!check_extension(&TreatySet::empty(), &set, now));
        assert!(!check_extension(&set, &TreatySet::empty(), now));
    }

    #[test]
    fn test_lengthened_expiry_accepted() {
        let metric: Arc<dyn Metric> = SampledMetric::new(1, 5.0);
        let now = Timestamp::from_secs(100);
        let from = leased_set(&metric, now);
        let treaty = from.get(0).unwrap();
        let to = from
            .add(treaty.with_expiry(treaty.expiry().saturating_add(Duration::from_secs(5))))
            .unwrap();
        assert!(check_extension(&from, &to, now));
        assert!(check_extension_strict(&from, &to, now));
        assert!(!check_extension(&to, &from, now));
    }

    #[test]
    fn test_changed_terms_rejected() {
        let metric: Arc<dyn Metric> = SampledMetric::new(1, 5.0);
        let now = Timestamp::from_secs(100);
        let from = leased_set(&metric, now);
        let to = from.add(from.get(0).unwrap().activate()).unwrap();
        let err = explain_extension(&from, &to, now).unwrap_err();
        assert!(err.contains("changed terms"));
    }

    #[test]
    fn test_new_treaty_rejected() {
        let metric: Arc<dyn Metric> = SampledMetric::new(1, 5.0);
        let now = Timestamp::from_secs(100);
        let from = leased_set(&metric, now);
        let (to, _) = from.create(TreatyStatement::at_most(9.0)).unwrap();
        assert!(!check_extension(&from, &to, now));
    }

    #[test]
    fn test_expired_treaty_may_be_dropped() {
        let metric: Arc<dyn Metric> = SampledMetric::new(1, 5.0);
        let now = Timestamp::from_secs(100);
        let from = leased_set(&metric, now);

        let later = Timestamp::from_secs(200);
        let to = from.remove(0);
        assert!(!check_extension(&from, &to, now));
        assert!(check_extension(&from, &to, later));
    }

    #[test]
    fn test_expired_treaty_cannot_be_revived() {
        let metric: Arc<dyn Metric> = SampledMetric::new(1, 5.0);
        let leased_at = Timestamp::from_secs(40);
        let from = leased_set(&metric, leased_at);
        let expired = from.get(0).unwrap();
        let now = Timestamp::from_secs(100);
        assert!(!expired.valid_at(now));

        // Carried over untouched
        assert!(check_extension(&from, &from, now));

        let renewed = expired.with_policy(lease(10_000), leased_at).activate();
        let to = from.add(renewed).unwrap();
        let err = explain_extension(&from, &to, now).unwrap_err();
        assert!(err.contains("revived"));

        let extended = from.add(expired.with_expiry(Timestamp::from_secs(10_000))).unwrap();
        assert!(!check_extension(&from, &extended, now));

        let activated = from.add(expired.activate()).unwrap();
        assert!(!check_extension(&from, &activated, now));
    }
}
