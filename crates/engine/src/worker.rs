//! Worker context
//!
//! A [`Worker`] owns everything one participant in the system needs: the
//! store registry, the object cache with its background reclaimer, and the
//! transaction manager. Several workers can live in one process; nothing
//! is global.
//!
//! ## Lifecycle
//!
//! ```text
//! Worker::open(dir) / Worker::new(config)
//!   register_store(...)
//!   transaction(|txn| ...)            one attempt
//!   transaction_with_retry(cfg, ...)  restart on conflict, same txn id
//!   auto_transaction(...)             retry with the configured policy
//! shutdown() / drop
//! ```

use crate::config::{WorkerConfig, CONFIG_FILE_NAME};
use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tessera_cache::{CacheStats, ObjectCache, ReclaimReport, Reclaimer};
use tessera_concurrency::{
    CommitOutcome, CommitReceipt, RetryConfig, TransactionContext, TransactionManager,
    TransactionStats,
};
use tessera_core::{
    BackoffClass, GlobSource, StoreProxy, StoreRegistry, TesseraError, TesseraResult,
    TransactionId, WorkerId,
};
use tracing::{debug, info, warn};

/// Snapshot of a worker's counters
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerStats {
    /// Cache counters
    pub cache: CacheStats,
    /// Transaction counters
    pub transactions: TransactionStats,
}

/// One worker: registry, cache, reclaimer and transaction manager
pub struct Worker {
    id: WorkerId,
    config: WorkerConfig,
    registry: Arc<StoreRegistry>,
    cache: Arc<ObjectCache>,
    manager: TransactionManager,
    reclaimer: Option<Reclaimer>,
    reclaim_handle: Mutex<Option<JoinHandle<()>>>,
    accepting: AtomicBool,
}

impl Worker {
    /// Worker configured by `config`, without an overlay
    ///
    /// # Errors
    ///
    /// `Config` if `config` does not validate.
    pub fn new(config: WorkerConfig) -> TesseraResult<Self> {
        Self::build(config, None)
    }

    /// Worker that fetches through `overlay` when `config.use_overlay` is set
    pub fn with_overlay(config: WorkerConfig, overlay: Arc<dyn GlobSource>) -> TesseraResult<Self> {
        Self::build(config, Some(overlay))
    }

    /// Worker configured by `tessera.toml` in `dir`
    ///
    /// Creates the directory and a default config file on first open.
    pub fn open(dir: impl AsRef<Path>) -> TesseraResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);
        WorkerConfig::write_default_if_missing(&config_path)?;
        let config = WorkerConfig::from_file(&config_path)?;
        Self::new(config)
    }

    fn build(config: WorkerConfig, overlay: Option<Arc<dyn GlobSource>>) -> TesseraResult<Self> {
        config.validate()?;
        let id = WorkerId::new();
        let registry = Arc::new(StoreRegistry::new());

        let mut cache = ObjectCache::new(Arc::clone(&registry));
        match overlay {
            Some(overlay) if config.use_overlay => cache = cache.with_overlay(overlay),
            Some(_) => debug!(target: "tessera::worker", worker = %id, "Overlay attached but disabled by config"),
            None => {}
        }
        let cache = Arc::new(cache);

        let manager = TransactionManager::new(Arc::clone(&registry), Arc::clone(&cache))
            .with_prepare_timeout(config.prepare_timeout());

        let reclaimer = config
            .reclaim_interval()
            .map(|interval| Reclaimer::new(Arc::clone(&cache), interval));
        let reclaim_handle = reclaimer.as_ref().map(Reclaimer::start);

        info!(target: "tessera::worker", worker = %id, prepare_timeout_ms = config.prepare_timeout_ms, reclaim_interval_ms = config.reclaim_interval_ms, "Worker started");
        Ok(Self {
            id,
            config,
            registry,
            cache,
            manager,
            reclaimer,
            reclaim_handle: Mutex::new(reclaim_handle),
            accepting: AtomicBool::new(true),
        })
    }

    // === Accessors ===

    /// Worker identity
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Active configuration
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Store registry
    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    /// Object cache
    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    /// Transaction manager, for manual begin/commit control
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Make `store` reachable from this worker
    pub fn register_store(&self, store: Arc<dyn StoreProxy>) {
        self.registry.register(store);
    }

    /// Run one reclamation pass now
    pub fn reclaim(&self) -> ReclaimReport {
        self.cache.reclaim()
    }

    /// Counter snapshot
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            cache: self.cache.stats(),
            transactions: self.manager.stats(),
        }
    }

    fn check_accepting(&self) -> TesseraResult<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(TesseraError::InvalidState(format!(
                "worker {} is shutting down",
                self.id
            )));
        }
        Ok(())
    }

    // === Transactions ===

    /// Run `f` in a transaction and commit it
    ///
    /// `f` returning `Err` aborts the transaction and returns that error.
    ///
    /// # Errors
    ///
    /// `Restart` if the commit must be retried; the caller may use
    /// [`Self::transaction_with_retry`] instead.
    ///
    /// # Example
    /// ```text
    /// let total = worker.transaction(|txn| {
    ///     let balance = txn.read(&account)?;
    ///     txn.write(&account, debit(balance))?;
    ///     Ok(())
    /// })?;
    /// ```
    pub fn transaction<F, T>(&self, f: F) -> TesseraResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> TesseraResult<T>,
    {
        self.transaction_with_receipt(f).map(|(value, _)| value)
    }

    /// Like [`Self::transaction`], also returning the commit receipt
    pub fn transaction_with_receipt<F, T>(&self, f: F) -> TesseraResult<(T, CommitReceipt)>
    where
        F: FnOnce(&mut Transaction<'_>) -> TesseraResult<T>,
    {
        self.check_accepting()?;
        self.run_attempt(self.manager.begin(), f)
    }

    /// Run `f` until it commits, restarting on restartable failures
    ///
    /// Each restart reuses the original transaction id and waits according
    /// to the failure's backoff class. Fatal errors and errors returned by
    /// `f` are not retried.
    ///
    /// # Errors
    ///
    /// The last `Restart` once `config.max_retries` is exhausted, or the
    /// first non-restartable error.
    pub fn transaction_with_retry<F, T>(&self, config: &RetryConfig, f: F) -> TesseraResult<T>
    where
        F: Fn(&mut Transaction<'_>) -> TesseraResult<T>,
    {
        self.check_accepting()?;

        let mut restart_id: Option<TransactionId> = None;
        let mut attempt = 0;
        loop {
            let ctx = match restart_id {
                Some(txn_id) => self.manager.begin_restart(txn_id),
                None => self.manager.begin(),
            };
            match self.run_attempt(ctx, &f) {
                Ok((value, _)) => return Ok(value),
                Err(e) if e.is_restartable() && attempt < config.max_retries => {
                    let class = e.backoff_class().unwrap_or(BackoffClass::Exponential);
                    let delay = config.delay_for(class, attempt);
                    debug!(target: "tessera::worker", txn = ?e.txn_id(), attempt, ?class, ?delay, "Restarting transaction");
                    restart_id = e.txn_id();
                    attempt += 1;
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(e) => {
                    if e.is_restartable() {
                        warn!(target: "tessera::worker", txn = ?e.txn_id(), attempts = attempt + 1, "Retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Auto-commit: [`Self::transaction_with_retry`] with the configured policy
    pub fn auto_transaction<F, T>(&self, f: F) -> TesseraResult<T>
    where
        F: Fn(&mut Transaction<'_>) -> TesseraResult<T>,
    {
        self.transaction_with_retry(&self.config.retry, f)
    }

    fn run_attempt<F, T>(&self, ctx: TransactionContext, f: F) -> TesseraResult<(T, CommitReceipt)>
    where
        F: FnOnce(&mut Transaction<'_>) -> TesseraResult<T>,
    {
        let mut txn = Transaction::new(&self.manager, ctx);
        match f(&mut txn) {
            Ok(value) => match txn.finish()? {
                CommitOutcome::Committed(receipt) => Ok((value, receipt)),
                CommitOutcome::Merged(_) => Err(TesseraError::InvalidState(
                    "top-level transaction merged into a parent".into(),
                )),
            },
            Err(e) => {
                txn.discard();
                Err(e)
            }
        }
    }

    // === Shutdown ===

    /// Stop accepting transactions and stop the reclaimer
    pub fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop_reclaimer();
        info!(target: "tessera::worker", worker = %self.id, "Worker stopped");
    }

    /// True once `shutdown` has run
    pub fn is_shutdown(&self) -> bool {
        !self.accepting.load(Ordering::SeqCst)
    }

    fn stop_reclaimer(&self) {
        if let Some(reclaimer) = &self.reclaimer {
            reclaimer.shutdown();
        }
        if let Some(handle) = self.reclaim_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.stop_reclaimer();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("manager", &self.manager)
            .finish()
    }
}
