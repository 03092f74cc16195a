//! Tessera - transactional object cache with cross-store optimistic commits
//!
//! A worker caches objects owned by remote stores, runs optimistic
//! transactions against its cache and commits them atomically across every
//! store involved. Metric treaties let a worker rely on derived values for a
//! bounded time without re-reading them.
//!
//! # Quick Start
//!
//! ```ignore
//! use tessera::{Worker, WorkerConfig};
//! use tessera::storage::MemoryStore;
//! use std::sync::Arc;
//!
//! let worker = Worker::new(WorkerConfig::default())?;
//! let store = Arc::new(MemoryStore::new("s1"));
//! worker.register_store(store.clone());
//!
//! let account = store.seed(100u64.to_be_bytes().to_vec()).oid;
//! worker.auto_transaction(|txn| {
//!     let balance = txn.read(&account)?;
//!     txn.write(&account, debit(&balance))
//! })?;
//! ```
//!
//! # Architecture
//!
//! | Crate | Contents |
//! |-------|----------|
//! | [`types`] | identities, errors, the store contract |
//! | [`storage`] | in-memory store and overlay |
//! | [`cache`] | object cache and reclaimer |
//! | [`concurrency`] | transaction contexts and two-phase commit |
//! | [`treaty`] | metric treaties, treaty sets, proxy maps |
//! | [`engine`] | the worker context and its configuration |

pub use tessera_cache as cache;
pub use tessera_concurrency as concurrency;
pub use tessera_core as types;
pub use tessera_engine as engine;
pub use tessera_storage as storage;
pub use tessera_treaty as treaty;

pub use tessera_cache::{CacheEntry, ObjectCache};
pub use tessera_concurrency::{RetryConfig, TransactionContext, TransactionManager};
pub use tessera_core::{
    BackoffClass, Oid, StoreId, StoreProxy, StoreRegistry, TesseraError, TesseraResult,
    Timestamp, TransactionId, VersionedObject,
};
pub use tessera_engine::{Transaction, Worker, WorkerConfig};
pub use tessera_treaty::{
    check_extension, check_extension_strict, EnforcementPolicy, MetricTreaty, ProxyMap,
    TreatyCell, TreatySet, TreatyStatement,
};
