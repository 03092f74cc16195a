//! Parallel prepare fan-out
//!
//! One thread per participating store sends the prepare; replies come back
//! over a bounded channel and are collected until every store answered or
//! the deadline passed. A store that did not answer in time gets `None`.
//!
//! Once collection stops the round is closed. A prepare that completes
//! after that point aborts its own attempt at its store, so a timed-out
//! store is never left holding staged writes. A later attempt of the same
//! transaction runs under another attempt id and is not affected.

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tessera_core::{PrepareOutcome, PrepareRequest, StoreProxy, TesseraResult};
use tracing::debug;

/// A store and the part of the transaction it must validate
pub(crate) struct Participant {
    pub(crate) store: Arc<dyn StoreProxy>,
    pub(crate) request: PrepareRequest,
}

pub(crate) type Reply = Option<TesseraResult<PrepareOutcome>>;

/// Send every prepare in parallel and wait at most `timeout` for replies
///
/// Replies are returned in participant order.
pub(crate) fn prepare_all(participants: &[Participant], timeout: Duration) -> Vec<Reply> {
    let count = participants.len();
    let (tx, rx) = bounded(count);
    let closed = Arc::new(Mutex::new(false));

    for (index, participant) in participants.iter().enumerate() {
        let store = Arc::clone(&participant.store);
        let request = participant.request.clone();
        let tx = tx.clone();
        let closed = Arc::clone(&closed);

        thread::spawn(move || {
            let result = store.prepare(&request);
            let closed = closed.lock();
            if *closed {
                drop(closed);
                if matches!(result, Ok(PrepareOutcome::Prepared { .. })) {
                    debug!(target: "tessera::txn", store = %store.id(), txn = %request.txn_id, attempt = %request.attempt, "Late prepare, aborting");
                    let _ = store.abort(request.attempt);
                }
                return;
            }
            let _ = tx.send((index, result));
        });
    }
    drop(tx);

    let deadline = Instant::now() + timeout;
    let mut replies: Vec<Reply> = (0..count).map(|_| None).collect();
    let mut pending = count;
    while pending > 0 {
        match rx.recv_deadline(deadline) {
            Ok((index, result)) => {
                replies[index] = Some(result);
                pending -= 1;
            }
            Err(_) => break,
        }
    }

    *closed.lock() = true;
    // Replies sent before the round closed are still valid.
    while let Ok((index, result)) = rx.try_recv() {
        replies[index] = Some(result);
    }
    replies
}
