//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's
//! main.rs.

#![allow(dead_code)]

use ed25519_dalek::SigningKey;
use std::sync::{Arc, Once};
use tessera::storage::{MemoryOverlay, MemoryStore};
use tessera::{RetryConfig, Worker, WorkerConfig};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Install a test-friendly subscriber once per process.
///
/// Silent unless `RUST_LOG` is set, e.g. `RUST_LOG=tessera::txn=debug`.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Cluster - stores, overlay and workers for one scenario
// ============================================================================

/// A set of in-memory stores sharing one dissemination overlay.
pub struct Cluster {
    pub overlay: Arc<MemoryOverlay>,
    pub stores: Vec<Arc<MemoryStore>>,
}

impl Cluster {
    /// Unsigned stores; workers always fetch from the stores.
    pub fn new(names: &[&str]) -> Self {
        init_tracing();
        let overlay = Arc::new(MemoryOverlay::new());
        let stores = names
            .iter()
            .map(|name| Arc::new(MemoryStore::new(*name)))
            .collect();
        Cluster { overlay, stores }
    }

    /// Stores that sign and publish every committed object to the overlay.
    pub fn signed(names: &[&str]) -> Self {
        init_tracing();
        let overlay = Arc::new(MemoryOverlay::new());
        let stores = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let key = SigningKey::from_bytes(&[i as u8 + 1; 32]);
                Arc::new(MemoryStore::new(*name).with_overlay(key, Arc::clone(&overlay)))
            })
            .collect();
        Cluster { overlay, stores }
    }

    pub fn store(&self, i: usize) -> &Arc<MemoryStore> {
        &self.stores[i]
    }

    /// Worker with every store registered and no background reclaimer.
    pub fn worker(&self) -> Worker {
        self.worker_with(test_config())
    }

    /// Worker reading through the overlay.
    pub fn overlay_worker(&self) -> Worker {
        let worker = Worker::with_overlay(test_config(), self.overlay.clone())
            .expect("worker config is valid");
        self.register_all(&worker);
        worker
    }

    pub fn worker_with(&self, config: WorkerConfig) -> Worker {
        let worker = Worker::new(config).expect("worker config is valid");
        self.register_all(&worker);
        worker
    }

    fn register_all(&self, worker: &Worker) {
        for store in &self.stores {
            worker.register_store(store.clone());
        }
    }
}

/// Short prepare timeout, fast retries, reclamation driven by the test.
pub fn test_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_prepare_timeout_ms(300)
        .with_reclaim_interval_ms(0)
        .with_retry(
            RetryConfig::new()
                .with_max_retries(50)
                .with_base_delay_ms(1)
                .with_max_delay_ms(8),
        )
}

// ============================================================================
// Payload helpers
// ============================================================================

pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}
