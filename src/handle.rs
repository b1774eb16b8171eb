use std::sync::Arc;
use std::time::Instant;

use deadpool_postgres::{Object, Pool, Transaction};
use tokio_postgres::Statement;
use tokio_postgres::types::ToSql;

use crate::error::DbError;
use crate::results::{DbRow, ResultSet, build_result_set};
use crate::sql::{summarize, summarize_params};
use crate::stats::RetryStats;
use crate::value::{SqlValue, to_sql_refs};

/// A connection handle: operations route to the bound transaction when one
/// is active, otherwise to the pool directly.
///
/// A transaction-bound handle borrows its transaction, so it cannot be used
/// once the transaction has committed or rolled back; the borrow checker
/// rejects any attempt to keep it alive past the closure it was handed to.
pub struct DbHandle<'a> {
    pub(crate) kind: HandleKind<'a>,
    pub(crate) stats: Arc<RetryStats>,
}

#[derive(Clone, Copy)]
pub(crate) enum HandleKind<'a> {
    Pool(&'a Pool),
    Tx(&'a Transaction<'a>),
}

/// A prepared statement. When prepared against the pool, the pooled
/// connection is held inside so statement and session stay together.
pub struct Prepared {
    stmt: Statement,
    conn: Option<Object>,
}

impl<'a> DbHandle<'a> {
    /// Execute a DML statement and return the affected row count.
    ///
    /// # Errors
    /// Returns an error if connection acquisition or execution fails.
    pub async fn exec(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let started = Instant::now();
        let refs = to_sql_refs(params);
        let result = match &self.kind {
            HandleKind::Pool(pool) => {
                let conn = pool.get().await?;
                conn.execute(sql, &refs).await.map_err(DbError::from)
            }
            HandleKind::Tx(tx) => tx.execute(sql, &refs).await.map_err(DbError::from),
        };
        log_op("exec", sql, params, started, result.is_ok());
        result
    }

    /// Execute a query and return all rows.
    ///
    /// # Errors
    /// Returns an error if connection acquisition, execution, or row
    /// extraction fails.
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<ResultSet, DbError> {
        let started = Instant::now();
        let refs = to_sql_refs(params);
        let result = match &self.kind {
            HandleKind::Pool(pool) => {
                let conn = pool.get().await?;
                conn.query(sql, &refs).await.map_err(DbError::from)
            }
            HandleKind::Tx(tx) => tx.query(sql, &refs).await.map_err(DbError::from),
        };
        log_op("query", sql, params, started, result.is_ok());
        build_result_set(&result?)
    }

    /// Execute a query expected to return at least one row.
    ///
    /// # Errors
    /// Returns `DbError::NoRows` when the query returns nothing, otherwise
    /// any execution error.
    pub async fn query_row(&self, sql: &str, params: &[SqlValue]) -> Result<DbRow, DbError> {
        let mut result_set = self.query(sql, params).await?;
        if result_set.rows.is_empty() {
            return Err(DbError::NoRows);
        }
        Ok(result_set.rows.swap_remove(0))
    }

    /// Prepare a statement for repeated execution via
    /// [`exec_prepared`](Self::exec_prepared) /
    /// [`query_prepared`](Self::query_prepared).
    ///
    /// # Errors
    /// Returns an error if connection acquisition or preparation fails.
    pub async fn prepare(&self, sql: &str) -> Result<Prepared, DbError> {
        let started = Instant::now();
        let result = match &self.kind {
            HandleKind::Pool(pool) => {
                let conn = pool.get().await?;
                match conn.prepare_cached(sql).await {
                    Ok(stmt) => Ok(Prepared {
                        stmt,
                        conn: Some(conn),
                    }),
                    Err(e) => Err(DbError::from(e)),
                }
            }
            HandleKind::Tx(tx) => match tx.prepare(sql).await {
                Ok(stmt) => Ok(Prepared { stmt, conn: None }),
                Err(e) => Err(DbError::from(e)),
            },
        };
        log_op("prepare", sql, &[], started, result.is_ok());
        result
    }

    /// Execute a prepared DML statement.
    ///
    /// # Errors
    /// Returns an error if execution fails, or if a transaction-prepared
    /// statement is executed on a pool-bound handle.
    pub async fn exec_prepared(
        &self,
        prepared: &Prepared,
        params: &[SqlValue],
    ) -> Result<u64, DbError> {
        let started = Instant::now();
        let refs = to_sql_refs(params);
        let result = match (&self.kind, &prepared.conn) {
            (_, Some(conn)) => conn.execute(&prepared.stmt, &refs).await.map_err(DbError::from),
            (HandleKind::Tx(tx), None) => {
                tx.execute(&prepared.stmt, &refs).await.map_err(DbError::from)
            }
            (HandleKind::Pool(_), None) => Err(DbError::Execution(
                "statement was prepared inside a transaction that has completed".to_string(),
            )),
        };
        log_op("exec_prepared", "<prepared>", params, started, result.is_ok());
        result
    }

    /// Execute a prepared query and return all rows.
    ///
    /// # Errors
    /// Same conditions as [`exec_prepared`](Self::exec_prepared).
    pub async fn query_prepared(
        &self,
        prepared: &Prepared,
        params: &[SqlValue],
    ) -> Result<ResultSet, DbError> {
        let started = Instant::now();
        let refs = to_sql_refs(params);
        let result = match (&self.kind, &prepared.conn) {
            (_, Some(conn)) => conn.query(&prepared.stmt, &refs).await.map_err(DbError::from),
            (HandleKind::Tx(tx), None) => {
                tx.query(&prepared.stmt, &refs).await.map_err(DbError::from)
            }
            (HandleKind::Pool(_), None) => Err(DbError::Execution(
                "statement was prepared inside a transaction that has completed".to_string(),
            )),
        };
        log_op("query_prepared", "<prepared>", params, started, result.is_ok());
        build_result_set(&result?)
    }

    /// Whether this handle is bound to an active transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        matches!(self.kind, HandleKind::Tx(_))
    }

    pub(crate) fn require_transaction(
        &self,
        op: &'static str,
    ) -> Result<&'a Transaction<'a>, DbError> {
        match self.kind {
            HandleKind::Tx(tx) => Ok(tx),
            HandleKind::Pool(_) => Err(DbError::TransactionRequired(op)),
        }
    }

    /// Acquire an execution target for a multi-statement bulk operation.
    /// Pool-bound handles pin one connection for the whole operation so all
    /// prepared batch statements share a session.
    pub(crate) async fn bulk_target(&self) -> Result<BulkTarget<'a>, DbError> {
        match self.kind {
            HandleKind::Pool(pool) => Ok(BulkTarget::Conn(pool.get().await?)),
            HandleKind::Tx(tx) => Ok(BulkTarget::Tx(tx)),
        }
    }
}

pub(crate) enum BulkTarget<'a> {
    Conn(Object),
    Tx(&'a Transaction<'a>),
}

impl BulkTarget<'_> {
    pub(crate) async fn prepare(&self, sql: &str) -> Result<Statement, DbError> {
        match self {
            BulkTarget::Conn(conn) => Ok(conn.prepare(sql).await?),
            BulkTarget::Tx(tx) => Ok(tx.prepare(sql).await?),
        }
    }

    pub(crate) async fn execute(
        &self,
        stmt: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, DbError> {
        match self {
            BulkTarget::Conn(conn) => Ok(conn.execute(stmt, params).await?),
            BulkTarget::Tx(tx) => Ok(tx.execute(stmt, params).await?),
        }
    }

    pub(crate) async fn query(
        &self,
        stmt: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<tokio_postgres::Row>, DbError> {
        match self {
            BulkTarget::Conn(conn) => Ok(conn.query(stmt, params).await?),
            BulkTarget::Tx(tx) => Ok(tx.query(stmt, params).await?),
        }
    }
}

fn log_op(op: &str, sql: &str, params: &[SqlValue], started: Instant, ok: bool) {
    tracing::debug!(
        op,
        params = params.len(),
        ok,
        elapsed_ms = started.elapsed().as_millis() as u64,
        statement = %summarize(sql),
        args = %summarize_params(params),
        "db operation"
    );
}
