//! Two-phase commit across in-memory stores
//!
//! These tests drive the TransactionManager against MemoryStore instances
//! and check what every store ends up holding:
//!
//! 1. **Conflicts** - stale reads and writes restart with the original id
//! 2. **Atomicity** - a failing store leaves nothing visible anywhere
//! 3. **Reachability** - slow or dead stores restart with exponential backoff
//! 4. **Fatal failures** - store rejections are not restartable
//! 5. **Concurrency** - racing increments never lose an update

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tessera_cache::ObjectCache;
use tessera_concurrency::{RetryConfig, TransactionManager, TransactionStatus};
use tessera_core::{
    BackoffClass, FailureKind, Oid, PrepareRequest, PrepareWrite, StoreProxy, StoreRegistry,
    TesseraError, TransactionId,
};
use tessera_storage::MemoryStore;

// ============================================================================
// Test Helpers
// ============================================================================

struct Env {
    stores: Vec<Arc<MemoryStore>>,
    cache: Arc<ObjectCache>,
    manager: Arc<TransactionManager>,
}

fn env(names: &[&str], prepare_timeout: Duration) -> Env {
    let registry = Arc::new(StoreRegistry::new());
    let stores: Vec<_> = names
        .iter()
        .map(|name| {
            let store = Arc::new(MemoryStore::new(*name));
            registry.register(store.clone());
            store
        })
        .collect();
    let cache = Arc::new(ObjectCache::new(Arc::clone(&registry)));
    let manager = Arc::new(
        TransactionManager::new(registry, Arc::clone(&cache)).with_prepare_timeout(prepare_timeout),
    );
    Env {
        stores,
        cache,
        manager,
    }
}

static FOREIGN_TXN: AtomicU64 = AtomicU64::new(1_000_000);

/// Commit a new version at the store, as another worker would
fn bump(store: &MemoryStore, onum: u64, payload: &[u8]) {
    let txn_id = TransactionId::new(FOREIGN_TXN.fetch_add(1, Ordering::SeqCst));
    let current = store.committed(onum).unwrap().version;
    let mut request = PrepareRequest::new(txn_id);
    request.writes.push(PrepareWrite {
        onum,
        expected_version: current,
        payload: payload.to_vec(),
    });
    assert!(store.prepare(&request).unwrap().is_prepared());
    store.commit(request.attempt).unwrap();
}

fn decode(payload: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(payload);
    u64::from_be_bytes(bytes)
}

// ============================================================================
// SECTION 1: Conflicts
// ============================================================================

#[test]
fn test_stale_read_conflicts_and_restarts() {
    let env = env(&["s1"], Duration::from_secs(5));
    let store = &env.stores[0];
    let a = store.seed(b"v1".to_vec());
    for i in 2..=5 {
        bump(store, a.oid.onum, format!("v{}", i).as_bytes());
    }

    let mut ctx = env.manager.begin();
    assert_eq!(env.manager.read(&mut ctx, &a.oid).unwrap(), b"v5");
    assert_eq!(ctx.read_set[&a.oid], 5);

    bump(store, a.oid.onum, b"v6");

    let txn_id = ctx.txn_id;
    let err = env.manager.commit(ctx).err().unwrap();
    match &err {
        TesseraError::Restart {
            txn_id: restarted,
            failures,
            backoff,
        } => {
            assert_eq!(*restarted, txn_id);
            let conflict = &failures.conflicts[&a.oid];
            assert_eq!(conflict.expected_version, 5);
            assert_eq!(conflict.actual_version, 6);
            assert_eq!(*backoff, BackoffClass::NonExponential);
        }
        other => panic!("expected restart, got {:?}", other),
    }

    // The restarted attempt sees the refreshed shadow and commits.
    let mut retry = env.manager.begin_restart(txn_id);
    assert_eq!(env.manager.read(&mut retry, &a.oid).unwrap(), b"v6");
    assert!(env.manager.commit(retry).is_ok());
}

#[test]
fn test_read_only_transaction_is_validated() {
    let env = env(&["s1"], Duration::from_secs(5));
    let store = &env.stores[0];
    let a = store.seed(b"v1".to_vec());

    let mut ctx = env.manager.begin();
    env.manager.read(&mut ctx, &a.oid).unwrap();
    bump(store, a.oid.onum, b"v2");

    let err = env.manager.commit(ctx).err().unwrap();
    assert!(err.is_restartable());
    assert_eq!(store.counters().prepares.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unseen_object_restarts_without_backoff() {
    let env = env(&["s1"], Duration::from_secs(5));
    let store = &env.stores[0];
    let ghost = Oid::new(store.id().clone(), 404);

    let mut ctx = env.manager.begin();
    ctx.record_read(ghost.clone(), 3).unwrap();

    let err = env.manager.commit(ctx).err().unwrap();
    assert_eq!(err.backoff_class(), Some(BackoffClass::None));
    assert!(err.failures().unwrap().unseen.contains(&ghost));
}

// ============================================================================
// SECTION 2: Atomicity
// ============================================================================

#[test]
fn test_conflict_at_one_store_leaves_nothing_visible_at_another() {
    let env = env(&["s1", "s2"], Duration::from_secs(5));
    let (s1, s2) = (&env.stores[0], &env.stores[1]);
    let x = s1.seed(b"x1".to_vec());
    let y = s2.seed(b"y1".to_vec());

    let mut ctx = env.manager.begin();
    env.manager.read(&mut ctx, &y.oid).unwrap();
    env.manager.write(&mut ctx, &x.oid, b"x2".to_vec()).unwrap();
    env.manager.write(&mut ctx, &y.oid, b"y2".to_vec()).unwrap();

    bump(s2, y.oid.onum, b"elsewhere");

    let err = env.manager.commit(ctx).err().unwrap();
    let failures = err.failures().unwrap();
    assert_eq!(failures.failed_stores().len(), 1);
    assert_eq!(failures.stores[0].store, *s2.id());

    let x_now = s1.committed(x.oid.onum).unwrap();
    assert_eq!(x_now.version, 1);
    assert_eq!(x_now.payload, b"x1");
    assert_eq!(s1.staged_count(), 0);
    assert_eq!(s1.locked_count(), 0);
    assert_eq!(s1.counters().commits.load(Ordering::SeqCst), 0);

    assert_eq!(env.cache.peek(&x.oid).unwrap().pin_count(), 0);
    assert_eq!(env.cache.peek(&y.oid).unwrap().pin_count(), 0);
}

#[test]
fn test_multi_store_commit_applies_everywhere() {
    let env = env(&["s1", "s2", "s3"], Duration::from_secs(5));
    let objects: Vec<_> = env
        .stores
        .iter()
        .map(|store| store.seed(b"0".to_vec()))
        .collect();

    let mut ctx = env.manager.begin();
    for object in &objects {
        env.manager
            .write(&mut ctx, &object.oid, b"1".to_vec())
            .unwrap();
    }
    let outcome = env.manager.commit(ctx).unwrap();
    let receipt = outcome.receipt().unwrap();
    assert_eq!(receipt.participants, 3);

    for (store, object) in env.stores.iter().zip(&objects) {
        assert_eq!(store.committed(object.oid.onum).unwrap().version, 2);
        assert_eq!(receipt.versions[&object.oid], 2);
    }
}

// ============================================================================
// SECTION 3: Reachability
// ============================================================================

#[test]
fn test_prepare_timeout_restarts_with_exponential_backoff() {
    let env = env(&["fast", "slow"], Duration::from_millis(50));
    let (fast, slow) = (&env.stores[0], &env.stores[1]);
    let a = fast.seed(b"a".to_vec());
    let b = slow.seed(b"b".to_vec());
    slow.set_prepare_delay(Duration::from_millis(300));

    let mut ctx = env.manager.begin();
    env.manager.write(&mut ctx, &a.oid, b"a2".to_vec()).unwrap();
    env.manager.write(&mut ctx, &b.oid, b"b2".to_vec()).unwrap();

    let err = env.manager.commit(ctx).err().unwrap();
    assert!(err.is_restartable());
    assert_eq!(err.backoff_class(), Some(BackoffClass::Exponential));
    let failures = err.failures().unwrap();
    assert_eq!(failures.stores[0].kind, FailureKind::Unreachable);
    assert!(failures.conflicts.is_empty());

    assert_eq!(fast.committed(a.oid.onum).unwrap().version, 1);
    assert_eq!(fast.staged_count(), 0);

    // The late prepare at the slow store cleans up after itself.
    thread::sleep(Duration::from_millis(500));
    assert_eq!(slow.staged_count(), 0);
    assert_eq!(slow.committed(b.oid.onum).unwrap().version, 1);
}

/// A prepare from a timed-out attempt that lands while the restarted
/// attempt is in flight must not disturb the restart's staging.
#[test]
fn test_late_prepare_does_not_touch_restarted_attempt() {
    let env = env(&["s", "t"], Duration::from_millis(200));
    let (s, t) = (&env.stores[0], &env.stores[1]);
    let a = s.seed(b"a1".to_vec());
    let b = t.seed(b"b1".to_vec());

    s.set_prepare_delay(Duration::from_millis(300));
    let mut first = env.manager.begin();
    env.manager.write(&mut first, &a.oid, b"a2".to_vec()).unwrap();
    env.manager.write(&mut first, &b.oid, b"b2".to_vec()).unwrap();
    let txn_id = first.txn_id;
    let err = env.manager.commit(first).err().unwrap();
    assert_eq!(err.backoff_class(), Some(BackoffClass::Exponential));

    // The first attempt's prepare is still sleeping at s and will land
    // while t holds up the second attempt.
    s.set_prepare_delay(Duration::ZERO);
    t.set_prepare_delay(Duration::from_millis(150));
    let mut second = env.manager.begin_restart(txn_id);
    env.manager.write(&mut second, &a.oid, b"a2".to_vec()).unwrap();
    env.manager.write(&mut second, &b.oid, b"b2".to_vec()).unwrap();
    let outcome = env.manager.commit(second).unwrap();
    let receipt = outcome.receipt().unwrap();
    assert_eq!(receipt.txn_id, txn_id);

    let a_now = s.committed(a.oid.onum).unwrap();
    let b_now = t.committed(b.oid.onum).unwrap();
    assert_eq!((a_now.version, a_now.payload.as_slice()), (2, &b"a2"[..]));
    assert_eq!((b_now.version, b_now.payload.as_slice()), (2, &b"b2"[..]));
    assert_eq!(receipt.versions[&a.oid], 2);
    assert_eq!(env.cache.peek(&a.oid).unwrap().version(), 2);

    thread::sleep(Duration::from_millis(300));
    assert_eq!(s.staged_count(), 0);
    assert_eq!(s.locked_count(), 0);
    assert_eq!(s.committed(a.oid.onum).unwrap().version, 2);
}

#[test]
fn test_unreachable_store_is_restartable() {
    let env = env(&["s1"], Duration::from_secs(5));
    let store = &env.stores[0];
    let a = store.seed(b"a".to_vec());

    let mut ctx = env.manager.begin();
    env.manager.write(&mut ctx, &a.oid, b"a2".to_vec()).unwrap();
    store.set_reachable(false);

    let err = env.manager.commit(ctx).err().unwrap();
    assert_eq!(err.backoff_class(), Some(BackoffClass::Exponential));

    store.set_reachable(true);
    assert_eq!(store.committed(a.oid.onum).unwrap().version, 1);
}

// ============================================================================
// SECTION 4: Fatal failures
// ============================================================================

#[test]
fn test_store_rejection_is_fatal() {
    let env = env(&["s1", "s2"], Duration::from_secs(5));
    let (s1, s2) = (&env.stores[0], &env.stores[1]);
    let a = s1.seed(b"a".to_vec());
    let b = s2.seed(b"b".to_vec());
    s2.fail_prepares(Some("object deleted".to_string()));

    let mut ctx = env.manager.begin();
    env.manager.write(&mut ctx, &a.oid, b"a2".to_vec()).unwrap();
    env.manager.write(&mut ctx, &b.oid, b"b2".to_vec()).unwrap();

    let err = env.manager.commit(ctx).err().unwrap();
    assert!(!err.is_restartable());
    assert!(matches!(err, TesseraError::TransactionFailed { .. }));
    assert!(err.to_string().contains("object deleted"));
    assert_eq!(s1.staged_count(), 0);
    assert_eq!(env.manager.stats().total_failed, 1);
}

#[test]
fn test_status_after_commit_attempts() {
    let env = env(&["s1"], Duration::from_secs(5));
    let ctx = env.manager.begin();
    assert_eq!(ctx.status(), TransactionStatus::Active);
    env.manager.commit(ctx).unwrap();

    let stats = env.manager.stats();
    assert_eq!(stats.total_committed, 1);
    assert_eq!(stats.active_count, 0);
}

// ============================================================================
// SECTION 5: Concurrency
// ============================================================================

#[test]
fn test_concurrent_increments_lose_no_update() {
    let env = env(&["s1"], Duration::from_secs(5));
    let counter = env.stores[0].seed(0u64.to_be_bytes().to_vec());

    let threads = 4;
    let per_thread = 10;
    let retry = RetryConfig::new().with_max_retries(1_000).with_base_delay_ms(1);
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let manager = Arc::clone(&env.manager);
            let barrier = Arc::clone(&barrier);
            let oid = counter.oid.clone();
            let retry = retry.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..per_thread {
                    let mut txn_id = None;
                    for attempt in 0..=retry.max_retries {
                        let mut ctx = match txn_id {
                            Some(id) => manager.begin_restart(id),
                            None => manager.begin(),
                        };
                        let value = decode(&manager.read(&mut ctx, &oid).unwrap());
                        manager
                            .write(&mut ctx, &oid, (value + 1).to_be_bytes().to_vec())
                            .unwrap();
                        match manager.commit(ctx) {
                            Ok(_) => break,
                            Err(e) if e.is_restartable() => {
                                txn_id = e.txn_id();
                                let class = e.backoff_class().unwrap_or_default();
                                thread::sleep(retry.delay_for(class, attempt));
                            }
                            Err(e) => panic!("unexpected failure: {}", e),
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let committed = env.stores[0].committed(counter.oid.onum).unwrap();
    assert_eq!(decode(&committed.payload), (threads * per_thread) as u64);
    assert_eq!(committed.version, 1 + (threads * per_thread) as u64);
    assert_eq!(env.manager.stats().active_count, 0);
}
