//! Background reclamation
//!
//! [`Reclaimer`] runs [`ObjectCache::reclaim`] on its own thread at a
//! fixed interval, so application threads never pay for the scan.
//! Shutdown is signalled through an atomic flag and observed within one
//! polling step.

use crate::cache::ObjectCache;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

/// Longest sleep between shutdown checks
const POLL_STEP: Duration = Duration::from_millis(50);

/// Background reclamation task
///
/// # Example
///
/// ```ignore
/// let reclaimer = Reclaimer::new(Arc::clone(&cache), Duration::from_secs(1));
/// let handle = reclaimer.start();
///
/// // ... use the cache ...
///
/// reclaimer.shutdown();
/// handle.join().unwrap();
/// ```
pub struct Reclaimer {
    cache: Arc<ObjectCache>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Reclaimer {
    /// Create a reclaimer for `cache` that scans every `interval`
    pub fn new(cache: Arc<ObjectCache>, interval: Duration) -> Self {
        Self {
            cache,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Scan interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the background thread
    ///
    /// The thread sleeps before its first pass and exits once `shutdown`
    /// is called.
    pub fn start(&self) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        thread::spawn(move || {
            debug!(target: "tessera::cache", ?interval, "Reclaimer started");
            let step = POLL_STEP.min(interval).max(Duration::from_millis(1));
            loop {
                let mut elapsed = Duration::ZERO;
                while elapsed < interval {
                    if shutdown.load(Ordering::Relaxed) {
                        debug!(target: "tessera::cache", "Reclaimer stopped");
                        return;
                    }
                    thread::sleep(step);
                    elapsed += step;
                }
                let report = cache.reclaim();
                trace!(target: "tessera::cache", cleared = report.cleared, removed = report.removed, "Reclaim pass");
            }
        })
    }

    /// Signal the background thread to exit
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// True once `shutdown` has been called
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::StoreRegistry;
    use tessera_storage::MemoryStore;

    #[test]
    fn test_reclaimer_shutdown_flag() {
        let cache = Arc::new(ObjectCache::new(Arc::new(StoreRegistry::new())));
        let reclaimer = Reclaimer::new(cache, Duration::from_secs(60));
        assert!(!reclaimer.is_shutdown());
        reclaimer.shutdown();
        assert!(reclaimer.is_shutdown());
    }

    #[test]
    fn test_reclaimer_removes_unheld_rows() {
        let store = Arc::new(MemoryStore::new("s1"));
        let registry = Arc::new(StoreRegistry::new());
        registry.register(store.clone());
        let cache = Arc::new(ObjectCache::new(registry));

        let object = store.seed(b"x".to_vec());
        drop(cache.get(&object.oid).unwrap());

        let reclaimer = Reclaimer::new(Arc::clone(&cache), Duration::from_millis(20));
        let handle = reclaimer.start();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cache.contains(&object.oid) && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!cache.contains(&object.oid));

        reclaimer.shutdown();
        handle.join().unwrap();
    }
}
