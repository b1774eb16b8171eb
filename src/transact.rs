use std::sync::Arc;

use deadpool_postgres::Pool;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::DbError;
use crate::handle::{DbHandle, HandleKind};
use crate::stats::RetryStats;

/// Maximum attempts for one logical transaction at a retryable isolation
/// level before giving up with [`DbError::RetriesExhausted`].
pub const MAX_TX_ATTEMPTS: u32 = 30;

/// Transaction isolation levels supported by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Serialization failures only occur, and are only worth retrying, at
    /// repeatable-read and serializable.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RepeatableRead | Self::Serializable)
    }
}

impl From<IsolationLevel> for tokio_postgres::IsolationLevel {
    fn from(level: IsolationLevel) -> Self {
        match level {
            IsolationLevel::ReadCommitted => tokio_postgres::IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead => tokio_postgres::IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable => tokio_postgres::IsolationLevel::Serializable,
        }
    }
}

impl DbHandle<'_> {
    /// Run `f` inside a transaction at the given isolation level, retrying
    /// the whole attempt on server-classified serialization failures.
    ///
    /// `f` receives a fresh handle bound to the transaction and may be
    /// invoked multiple times, once per attempt. Each attempt acquires a
    /// dedicated pooled connection that is released on every exit path;
    /// dropping the transaction on unwind rolls it back before a panic in
    /// `f` propagates further.
    ///
    /// Only errors whose server-reported SQLSTATE is 40001 are retried, and
    /// only at retryable isolation levels, up to [`MAX_TX_ATTEMPTS`].
    /// Constraint violations, cancellations, pool errors, and anything whose
    /// message merely mentions the code are surfaced immediately.
    ///
    /// The handle passed to `f` borrows the transaction and cannot escape it:
    ///
    /// ```compile_fail
    /// # use pg_transact::{Database, DbError, IsolationLevel};
    /// # async fn demo(db: Database) -> Result<(), DbError> {
    /// let mut escaped = None;
    /// db.handle()
    ///     .transact(IsolationLevel::Serializable, |h| {
    ///         Box::pin(async move {
    ///             escaped = Some(h); // the borrow may not outlive the closure
    ///             Ok(())
    ///         })
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// `DbError::NestedTransaction` when called on a transaction-bound
    /// handle; `DbError::RetriesExhausted` after [`MAX_TX_ATTEMPTS`]
    /// serialization failures; otherwise the first non-retryable error.
    pub async fn transact<T, F>(&self, isolation: IsolationLevel, f: F) -> Result<T, DbError>
    where
        F: for<'t> Fn(&'t DbHandle<'t>) -> BoxFuture<'t, Result<T, DbError>>,
    {
        let HandleKind::Pool(pool) = self.kind else {
            return Err(DbError::NestedTransaction);
        };

        let retryable = isolation.is_retryable();
        let mut attempt: u32 = 1;
        loop {
            match run_attempt(pool, isolation, &self.stats, &f).await {
                Ok(value) => {
                    self.stats.record(attempt - 1);
                    return Ok(value);
                }
                Err(err) if retryable && err.is_serialization_failure() => {
                    self.stats.record(attempt);
                    if attempt >= MAX_TX_ATTEMPTS {
                        return Err(DbError::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    tracing::warn!(
                        attempt,
                        error = %err,
                        "serialization conflict, retrying transaction"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Like [`transact`](Self::transact), but raced against a cancellation
    /// token. Cancellation aborts the in-flight attempt and yields
    /// [`DbError::Canceled`], which is never treated as retryable.
    ///
    /// # Errors
    /// `DbError::Canceled` on cancellation, otherwise as
    /// [`transact`](Self::transact).
    pub async fn transact_with_cancel<T, F>(
        &self,
        cancel: &CancellationToken,
        isolation: IsolationLevel,
        f: F,
    ) -> Result<T, DbError>
    where
        F: for<'t> Fn(&'t DbHandle<'t>) -> BoxFuture<'t, Result<T, DbError>>,
    {
        tokio::select! {
            () = cancel.cancelled() => Err(DbError::Canceled),
            result = self.transact(isolation, f) => result,
        }
    }
}

async fn run_attempt<T, F>(
    pool: &Pool,
    isolation: IsolationLevel,
    stats: &Arc<RetryStats>,
    f: &F,
) -> Result<T, DbError>
where
    F: for<'t> Fn(&'t DbHandle<'t>) -> BoxFuture<'t, Result<T, DbError>>,
{
    let mut conn = pool.get().await?;
    let tx = conn
        .build_transaction()
        .isolation_level(isolation.into())
        .start()
        .await?;
    let handle = DbHandle {
        kind: HandleKind::Tx(&tx),
        stats: Arc::clone(stats),
    };
    match f(&handle).await {
        Ok(value) => {
            drop(handle);
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            drop(handle);
            if let Err(rollback_err) = tx.rollback().await {
                tracing::debug!(error = %rollback_err, "rollback after transaction error failed");
            }
            Err(err)
        }
    }
    // `conn` drops here on every path, returning the connection to the pool.
}
