//! Cross-store atomicity through the worker API

use crate::common::*;
use tessera::{StoreProxy, TesseraError};

/// Transfer between two stores while another worker moves one side.
/// The failed attempt leaves both stores untouched; the retry applies both.
#[test]
fn test_transfer_conflict_leaves_no_trace() {
    let cluster = Cluster::new(&["bank-a", "bank-b"]);
    let from = cluster.store(0).seed(encode_u64(100)).oid;
    let to = cluster.store(1).seed(encode_u64(0)).oid;

    let teller = cluster.worker();
    let auditor = cluster.worker();

    // Teller caches both balances, then the auditor credits `to`.
    teller
        .transaction(|txn| {
            txn.read(&from)?;
            txn.read(&to)
        })
        .unwrap();
    auditor
        .transaction(|txn| {
            let balance = decode_u64(&txn.read(&to)?);
            txn.write(&to, encode_u64(balance + 5))
        })
        .unwrap();

    let transfer = |txn: &mut tessera::Transaction<'_>| {
        let a = decode_u64(&txn.read(&from)?);
        let b = decode_u64(&txn.read(&to)?);
        txn.write(&from, encode_u64(a - 30))?;
        txn.write(&to, encode_u64(b + 30))
    };

    let err = teller.transaction(transfer).unwrap_err();
    assert!(err.is_restartable());
    assert_eq!(decode_u64(&cluster.store(0).committed(from.onum).unwrap().payload), 100);
    assert_eq!(cluster.store(0).staged_count(), 0);
    assert_eq!(cluster.store(1).staged_count(), 0);

    teller.auto_transaction(transfer).unwrap();
    assert_eq!(decode_u64(&cluster.store(0).committed(from.onum).unwrap().payload), 70);
    assert_eq!(decode_u64(&cluster.store(1).committed(to.onum).unwrap().payload), 35);
}

#[test]
fn test_created_objects_visible_to_other_workers() {
    let cluster = Cluster::new(&["s1", "s2"]);
    let writer = cluster.worker();
    let reader = cluster.worker();
    let s1 = cluster.store(0).id().clone();
    let s2 = cluster.store(1).id().clone();

    let (a, b) = writer
        .transaction(|txn| {
            let a = txn.create(&s1, b"left".to_vec())?;
            let b = txn.create(&s2, b"right".to_vec())?;
            Ok((a, b))
        })
        .unwrap();

    let (left, right) = reader
        .transaction(|txn| Ok((txn.read(&a)?, txn.read(&b)?)))
        .unwrap();
    assert_eq!(left, b"left".to_vec());
    assert_eq!(right, b"right".to_vec());
}

#[test]
fn test_failed_nested_transaction_is_discarded() {
    let cluster = Cluster::new(&["s1"]);
    let worker = cluster.worker();
    let oid = cluster.store(0).seed(encode_u64(1)).oid;
    let s1 = cluster.store(0).id().clone();

    let created = worker
        .transaction(|txn| {
            txn.write(&oid, encode_u64(2))?;
            let inner: Result<(), TesseraError> = txn.nested(|inner| {
                inner.create(&s1, b"orphan".to_vec())?;
                Err(TesseraError::InvalidState("abandon".into()))
            });
            assert!(inner.is_err());
            txn.nested(|inner| inner.create(&s1, b"kept".to_vec()))
        })
        .unwrap();

    assert_eq!(decode_u64(&cluster.store(0).committed(oid.onum).unwrap().payload), 2);
    assert_eq!(
        cluster.store(0).committed(created.onum).unwrap().payload,
        b"kept".to_vec()
    );
}
