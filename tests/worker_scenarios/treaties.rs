//! Treaty state carried in transactional objects

use crate::common::*;
use std::sync::Arc;
use std::time::Duration;
use tessera::treaty::codec::{set_from_bytes, set_to_bytes};
use tessera::treaty::{Metric, RemoteRef, SampledMetric};
use tessera::{
    check_extension, EnforcementPolicy, ProxyMap, StoreProxy, TesseraError, Timestamp, TreatyCell,
    TreatySet, TreatyStatement,
};

fn lease(secs: u64) -> EnforcementPolicy {
    EnforcementPolicy::Lease {
        duration: Duration::from_secs(secs),
    }
}

/// A treaty set written by one worker is decoded by another against its
/// own handle on the same metric.
#[test]
fn test_treaty_set_travels_through_store() {
    let cluster = Cluster::new(&["s1"]);
    let writer = cluster.worker();
    let reader = cluster.worker();
    let s1 = cluster.store(0).id().clone();
    let now = Timestamp::from_secs(10_000);

    let stock: Arc<dyn Metric> = SampledMetric::new(77, 40.0);
    let (set, treaty) = TreatySet::for_metric(&stock)
        .create(TreatyStatement::at_least(10.0))
        .unwrap();
    let set = set.add(treaty.with_policy(lease(60), now).activate()).unwrap();

    let bytes = set_to_bytes(&set).unwrap();
    let oid = writer.transaction(|txn| txn.create(&s1, bytes.clone())).unwrap();

    let their_stock: Arc<dyn Metric> = SampledMetric::new(77, 40.0);
    let payload = reader.transaction(|txn| txn.read(&oid)).unwrap();
    let decoded = set_from_bytes(&payload, &their_stock).unwrap();

    assert_eq!(decoded, set);
    assert!(decoded.get_valid(treaty.id(), now).is_some());
    assert!(decoded
        .get_valid(treaty.id(), now.saturating_add(Duration::from_secs(60)))
        .is_none());
    assert!(check_extension(&set, &decoded, now));
}

/// Refreshes go through the cell; a fallback needs a real update.
#[test]
fn test_refresh_versus_fallback() {
    let sampled = SampledMetric::new(5, 50.0);
    let metric: Arc<dyn Metric> = sampled.clone();
    let start = Timestamp::from_secs(1_000);

    let (set, treaty) = TreatySet::for_metric(&metric)
        .create(TreatyStatement::at_least(20.0))
        .unwrap();
    let cell = TreatyCell::new(set.add(treaty.with_policy(lease(30), start)).unwrap());

    let later = Timestamp::from_secs(1_010);
    assert!(cell.try_extend(cell.load().refresh_all(false, later), later));
    assert_eq!(
        cell.load().get(treaty.id()).unwrap().expiry(),
        Timestamp::from_secs(1_040)
    );

    // The metric drops below the bound: refreshing falls back, which
    // changes the treaty's terms and is not an extension.
    sampled.set(5.0, 0.0);
    let fallen = cell.load().refresh_all(false, later);
    assert!(fallen.get(treaty.id()).unwrap().policy().is_unenforced());
    assert!(!cell.try_extend(fallen.clone(), later));

    let current = cell.load();
    let installed = cell.compare_and_swap(&current, fallen).unwrap();
    assert!(installed.get_valid(treaty.id(), later).is_none());
}

#[test]
fn test_proxy_map_resolves_through_registry() {
    let cluster = Cluster::new(&["s1", "s2"]);
    let worker = cluster.worker();
    let s1 = cluster.store(0).id().clone();

    let map = ProxyMap::empty()
        .put(RemoteRef::new(cluster.store(0).clone(), 12))
        .put(RemoteRef::new(cluster.store(1).clone(), 34));
    let oid = worker
        .transaction(|txn| txn.create(&s1, map.to_bytes().unwrap()))
        .unwrap();

    let payload = worker.transaction(|txn| txn.read(&oid)).unwrap();
    let decoded = ProxyMap::from_bytes(&payload, worker.registry()).unwrap();
    assert_eq!(decoded, map);

    // A worker that only knows s1 cannot resolve the s2 entry.
    let partial = Cluster {
        overlay: cluster.overlay.clone(),
        stores: vec![cluster.store(0).clone()],
    }
    .worker();
    let err = ProxyMap::from_bytes(&payload, partial.registry()).unwrap_err();
    assert!(matches!(err, TesseraError::UnknownStore(_)));
}
