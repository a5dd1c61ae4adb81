use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::{Store, StoreError, UnitOfWork};

/// Runs work inside a unit of work and owns the commit/rollback decision.
///
/// The closure receives the transaction-bound handle; everything it reads or
/// writes through that handle commits together when it returns `Ok`, and is
/// discarded when it returns `Err` (or panics, or its future is dropped).
///
/// There are no nested units of work: a step that is shared between
/// operations takes `&mut S::Tx` and is called from inside the closure.
///
/// Closures must own what they capture (clone `Arc`s in before the call):
/// the returned future borrows only the handle.
pub struct UnitOfWorkManager<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for UnitOfWorkManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> UnitOfWorkManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run `work` atomically: commit on `Ok`, roll back on `Err`.
    pub async fn run<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: for<'tx> FnOnce(&'tx mut S::Tx) -> BoxFuture<'tx, Result<T, E>> + Send,
        T: Send,
        E: From<StoreError> + Send,
    {
        let mut tx = self.store.begin().await?;

        match work(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                debug!("unit of work committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed; transaction discarded on drop");
                }
                debug!("unit of work rolled back");
                Err(err)
            }
        }
    }

    /// Run read-only `work` and always roll back.
    pub async fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: for<'tx> FnOnce(&'tx mut S::Tx) -> BoxFuture<'tx, Result<T, E>> + Send,
        T: Send,
        E: From<StoreError> + Send,
    {
        let mut tx = self.store.begin().await?;
        let result = work(&mut tx).await;
        if let Err(rollback_err) = tx.rollback().await {
            warn!(error = %rollback_err, "rollback of read-only unit of work failed");
        }
        result
    }

    /// Like [`read`](Self::read), but every read inside `work` sees the same
    /// committed state. Use it when several reads must agree with each other.
    pub async fn snapshot<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: for<'tx> FnOnce(&'tx mut S::Tx) -> BoxFuture<'tx, Result<T, E>> + Send,
        T: Send,
        E: From<StoreError> + Send,
    {
        let mut tx = self.store.begin_snapshot().await?;
        let result = work(&mut tx).await;
        if let Err(rollback_err) = tx.rollback().await {
            warn!(error = %rollback_err, "rollback of snapshot unit of work failed");
        }
        result
    }
}
