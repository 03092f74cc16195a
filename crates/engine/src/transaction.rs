//! Transaction handle passed to worker closures

use tessera_concurrency::{CommitOutcome, TransactionContext, TransactionManager};
use tessera_core::{Oid, StoreId, TesseraError, TesseraResult, TransactionId};
use tracing::trace;

/// Handle for reads and writes inside [`crate::Worker::transaction`]
///
/// Wraps a [`TransactionContext`] and routes every access through the
/// worker's [`TransactionManager`]. The worker commits or aborts the
/// context once the closure returns.
pub struct Transaction<'w> {
    manager: &'w TransactionManager,
    ctx: Option<TransactionContext>,
}

impl<'w> Transaction<'w> {
    pub(crate) fn new(manager: &'w TransactionManager, ctx: TransactionContext) -> Self {
        Self {
            manager,
            ctx: Some(ctx),
        }
    }

    pub(crate) fn into_context(self) -> Option<TransactionContext> {
        self.ctx
    }

    fn ctx(&mut self) -> TesseraResult<&mut TransactionContext> {
        self.ctx
            .as_mut()
            .ok_or_else(|| TesseraError::InvalidState("transaction context was lost".into()))
    }

    /// Id of the running transaction
    pub fn id(&self) -> Option<TransactionId> {
        self.ctx.as_ref().map(|ctx| ctx.txn_id)
    }

    /// Underlying context
    pub fn context(&self) -> Option<&TransactionContext> {
        self.ctx.as_ref()
    }

    /// Read `oid`
    pub fn read(&mut self, oid: &Oid) -> TesseraResult<Vec<u8>> {
        let manager = self.manager;
        manager.read(self.ctx()?, oid)
    }

    /// Write `payload` to `oid`
    pub fn write(&mut self, oid: &Oid, payload: impl Into<Vec<u8>>) -> TesseraResult<()> {
        let manager = self.manager;
        manager.write(self.ctx()?, oid, payload.into())
    }

    /// Create a new object at `store`
    pub fn create(&mut self, store: &StoreId, payload: impl Into<Vec<u8>>) -> TesseraResult<Oid> {
        let manager = self.manager;
        manager.create(self.ctx()?, store, payload.into())
    }

    /// Run `f` in a nested transaction
    ///
    /// On `Ok` the child's reads and writes fold into this transaction; on
    /// `Err` they are discarded and the error is returned, leaving this
    /// transaction usable.
    pub fn nested<F, T>(&mut self, f: F) -> TesseraResult<T>
    where
        F: FnOnce(&mut Transaction<'w>) -> TesseraResult<T>,
    {
        let parent = self
            .ctx
            .take()
            .ok_or_else(|| TesseraError::InvalidState("transaction context was lost".into()))?;
        let child = self.manager.begin_nested(parent)?;
        let depth = child.depth();

        let mut inner = Transaction::new(self.manager, child);
        let result = f(&mut inner);
        let child = inner
            .into_context()
            .ok_or_else(|| TesseraError::InvalidState("nested context was lost".into()))?;

        match result {
            Ok(value) => {
                let outcome = self.manager.commit(child)?;
                self.ctx = outcome.into_parent();
                trace!(target: "tessera::txn", depth, "Nested transaction merged");
                Ok(value)
            }
            Err(e) => {
                self.ctx = self.manager.abort(child)?;
                trace!(target: "tessera::txn", depth, error = %e, "Nested transaction discarded");
                Err(e)
            }
        }
    }

    pub(crate) fn finish(self) -> TesseraResult<CommitOutcome> {
        let manager = self.manager;
        let ctx = self
            .ctx
            .ok_or_else(|| TesseraError::InvalidState("transaction context was lost".into()))?;
        manager.commit(ctx)
    }

    pub(crate) fn discard(self) {
        if let Some(ctx) = self.ctx {
            let _ = self.manager.abort(ctx);
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("txn_id", &self.id())
            .field("depth", &self.ctx.as_ref().map(|ctx| ctx.depth()))
            .finish()
    }
}
