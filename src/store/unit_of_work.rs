// Atomic multi-write coordinator

use crate::core::errors::StoreError;
use crate::store::TransactionalStore;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Runs a batch of writes as one transaction
///
/// Every exit path releases the transaction: success commits, an error or a
/// panic rolls back, and a dropped future rolls back through the store's
/// transaction guard.
pub struct UnitOfWork<S: TransactionalStore> {
    store: Arc<S>,
}

impl<S: TransactionalStore> Clone for UnitOfWork<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: TransactionalStore> UnitOfWork<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run `work` inside a transaction
    ///
    /// - `work` returns `Ok`: commit. A commit failure is returned as
    ///   `StoreError::TransactionFailed` and nothing is persisted.
    /// - `work` returns `Err`: roll back and return that error unchanged.
    /// - `work` panics: roll back, then resume the panic.
    ///
    /// A failed rollback is logged; the caller still sees the original outcome.
    pub async fn execute<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<T, E>> + Send,
        T: Send,
        E: From<StoreError> + Send,
    {
        let mut tx = self.store.begin().await.map_err(E::from)?;

        let outcome = AssertUnwindSafe(work(&mut tx)).catch_unwind().await;

        match outcome {
            Ok(Ok(value)) => {
                self.store.commit(tx).await.map_err(|e| {
                    error!(error = %e, "Transaction commit failed");
                    E::from(StoreError::TransactionFailed(format!("commit failed: {}", e)))
                })?;
                debug!("Transaction committed");
                Ok(value)
            }
            Ok(Err(err)) => {
                self.release(tx).await;
                Err(err)
            }
            Err(panic) => {
                error!("Panic inside transaction, rolling back");
                self.release(tx).await;
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn release(&self, tx: S::Tx) {
        match self.store.rollback(tx).await {
            Ok(()) => debug!("Transaction rolled back"),
            Err(e) => warn!(error = %e, "Rollback failed"),
        }
    }
}
