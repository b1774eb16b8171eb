use std::sync::Arc;

use deadpool_postgres::{Config as PgConfig, Pool, Runtime};
use tokio_postgres::NoTls;

use crate::error::DbError;
use crate::handle::{DbHandle, HandleKind};
use crate::stats::RetryStats;

/// A validated connection pool plus the retry statistics shared by every
/// transaction run through it.
#[derive(Clone, Debug)]
pub struct Database {
    pool: Pool,
    stats: Arc<RetryStats>,
}

impl Database {
    /// Build a pool from a deadpool-postgres config.
    ///
    /// # Errors
    /// Returns `DbError::Config` if a required field is missing or the pool
    /// cannot be created. Connections themselves are established lazily.
    pub fn connect(pg_config: PgConfig) -> Result<Self, DbError> {
        if pg_config.dbname.is_none() {
            return Err(DbError::Config("dbname is required".to_string()));
        }
        if pg_config.host.is_none() {
            return Err(DbError::Config("host is required".to_string()));
        }
        if pg_config.port.is_none() {
            return Err(DbError::Config("port is required".to_string()));
        }
        if pg_config.user.is_none() {
            return Err(DbError::Config("user is required".to_string()));
        }
        if pg_config.password.is_none() {
            return Err(DbError::Config("password is required".to_string()));
        }

        let pool = pg_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DbError::Config(format!("failed to create Postgres pool: {e}")))?;

        Ok(Self {
            pool,
            stats: Arc::new(RetryStats::default()),
        })
    }

    /// A handle routing operations straight to the pool. Transactions are
    /// started from a handle via [`DbHandle::transact`].
    #[must_use]
    pub fn handle(&self) -> DbHandle<'_> {
        DbHandle {
            kind: HandleKind::Pool(&self.pool),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Retry statistics for all transactions run through this pool.
    #[must_use]
    pub fn retry_stats(&self) -> &RetryStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config() -> PgConfig {
        let mut cfg = PgConfig::new();
        cfg.dbname = Some("db".to_string());
        cfg.host = Some("localhost".to_string());
        cfg.port = Some(5432);
        cfg.user = Some("u".to_string());
        cfg.password = Some("p".to_string());
        cfg
    }

    #[test]
    fn missing_fields_are_config_errors() {
        for field in ["dbname", "host", "port", "user", "password"] {
            let mut cfg = full_config();
            match field {
                "dbname" => cfg.dbname = None,
                "host" => cfg.host = None,
                "port" => cfg.port = None,
                "user" => cfg.user = None,
                _ => cfg.password = None,
            }
            let err = Database::connect(cfg).expect_err(field);
            assert!(matches!(err, DbError::Config(_)), "{field}: {err}");
        }
    }

    #[test]
    fn full_config_builds_a_pool_without_connecting() {
        let db = Database::connect(full_config()).expect("pool");
        assert_eq!(db.retry_stats().max_observed(), 0);
    }
}
