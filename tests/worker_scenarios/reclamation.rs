//! Cache reclamation while transactions run

use crate::common::*;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

#[test]
fn test_reclaim_drops_idle_rows() {
    let cluster = Cluster::new(&["s1"]);
    let oid = cluster.store(0).seed(b"idle".to_vec()).oid;
    let worker = cluster.worker();

    worker.transaction(|txn| txn.read(&oid)).unwrap();
    assert!(worker.cache().contains(&oid));

    let report = worker.reclaim();
    assert_eq!(report.removed, 1);
    assert!(!worker.cache().contains(&oid));

    // The next read fetches again.
    worker.transaction(|txn| txn.read(&oid)).unwrap();
    assert_eq!(cluster.store(0).counters().fetches.load(Ordering::SeqCst), 2);
}

#[test]
fn test_pinned_row_survives_reclaim() {
    let cluster = Cluster::new(&["s1"]);
    let oid = cluster.store(0).seed(b"v1".to_vec()).oid;
    let worker = cluster.worker();
    let manager = worker.manager();

    let mut ctx = manager.begin();
    manager.write(&mut ctx, &oid, b"v2".to_vec()).unwrap();

    let report = worker.reclaim();
    assert_eq!(report.removed, 0);
    assert!(worker.cache().peek(&oid).unwrap().is_pinned());

    manager.commit(ctx).unwrap();
    assert!(!worker.cache().peek(&oid).unwrap().is_pinned());
    assert_eq!(worker.reclaim().removed, 1);
}

#[test]
fn test_background_reclaimer_runs() {
    let cluster = Cluster::new(&["s1"]);
    let oid = cluster.store(0).seed(b"bg".to_vec()).oid;
    let worker = cluster.worker_with(test_config().with_reclaim_interval_ms(10));

    worker.transaction(|txn| txn.read(&oid)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while worker.cache().contains(&oid) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!worker.cache().contains(&oid));
    assert!(worker.stats().cache.reclaimed >= 1);

    worker.shutdown();
}
