//! Reads served by the dissemination overlay

use crate::common::*;
use std::sync::atomic::Ordering;
use tessera::storage::MemoryOverlay;
use tessera::Worker;

#[test]
fn test_overlay_read_skips_store() {
    let cluster = Cluster::signed(&["s1"]);
    let oid = cluster.store(0).seed(b"published".to_vec()).oid;
    let worker = cluster.overlay_worker();

    let payload = worker.transaction(|txn| txn.read(&oid)).unwrap();
    assert_eq!(payload, b"published".to_vec());
    assert_eq!(cluster.store(0).counters().fetches.load(Ordering::SeqCst), 0);
    assert_eq!(worker.stats().cache.overlay_fetches, 1);
}

#[test]
fn test_commits_republish_to_overlay() {
    let cluster = Cluster::signed(&["s1"]);
    let oid = cluster.store(0).seed(encode_u64(1)).oid;
    let writer = cluster.worker();
    let reader = cluster.overlay_worker();

    writer
        .transaction(|txn| {
            let value = decode_u64(&txn.read(&oid)?);
            txn.write(&oid, encode_u64(value * 10))
        })
        .unwrap();

    let value = reader.transaction(|txn| txn.read(&oid)).unwrap();
    assert_eq!(decode_u64(&value), 10);
    assert_eq!(reader.cache().peek(&oid).unwrap().version(), 2);
    assert_eq!(reader.stats().cache.store_fetches, 0);
}

#[test]
fn test_overlay_disabled_by_config() {
    let cluster = Cluster::signed(&["s1"]);
    let oid = cluster.store(0).seed(b"x".to_vec()).oid;
    let worker = Worker::with_overlay(test_config().with_overlay(false), cluster.overlay.clone())
        .unwrap();
    worker.register_store(cluster.store(0).clone());

    worker.transaction(|txn| txn.read(&oid)).unwrap();
    assert_eq!(worker.stats().cache.overlay_fetches, 0);
    assert_eq!(worker.stats().cache.store_fetches, 1);
}

#[test]
fn test_glob_from_another_overlay_owner_rejected() {
    // Same store name, different signing key: the glob cannot verify.
    let genuine = Cluster::signed(&["s1"]);
    let impostor = Cluster::signed(&["s0", "s1"]);
    let oid = genuine.store(0).seed(b"real".to_vec()).oid;
    impostor.store(1).seed(b"fake".to_vec());

    let overlay: std::sync::Arc<MemoryOverlay> = impostor.overlay.clone();
    let worker = Worker::with_overlay(test_config(), overlay).unwrap();
    worker.register_store(genuine.store(0).clone());

    let payload = worker.transaction(|txn| txn.read(&oid)).unwrap();
    assert_eq!(payload, b"real".to_vec());
    assert_eq!(worker.stats().cache.overlay_rejections, 1);
    assert_eq!(worker.stats().cache.store_fetches, 1);
}
