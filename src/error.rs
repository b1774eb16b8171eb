use std::ops::Range;

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Errors produced by the data-access core.
#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[error(transparent)]
    Pool(#[from] deadpool::managed::PoolError<tokio_postgres::Error>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input shape error: {0}")]
    InputShape(String),

    #[error("Handle is already inside a transaction; nested transactions are not supported")]
    NestedTransaction,

    #[error("{0} requires an active transaction")]
    TransactionRequired(&'static str),

    #[error("Query returned no rows")]
    NoRows,

    #[error("Operation canceled")]
    Canceled,

    #[error("Transaction gave up after {attempts} attempts, each ending in a serialization conflict")]
    RetriesExhausted { attempts: u32, source: Box<DbError> },

    #[error("Bulk statement on {table} failed for rows {}..{}", rows.start, rows.end)]
    BatchFailed {
        table: String,
        rows: Range<usize>,
        source: Box<DbError>,
    },

    #[error("SQL execution error: {0}")]
    Execution(String),
}

impl DbError {
    /// The server-reported SQLSTATE for this error, if the backing store
    /// produced one. Wrapper variants report the state of their source so
    /// retry classification sees through batching and retry bookkeeping.
    #[must_use]
    pub fn sql_state(&self) -> Option<&SqlState> {
        match self {
            DbError::Postgres(e) => e.code(),
            DbError::RetriesExhausted { source, .. } | DbError::BatchFailed { source, .. } => {
                source.sql_state()
            }
            _ => None,
        }
    }

    /// Whether the server classified this error as a serialization failure
    /// (SQLSTATE 40001). Only the code reported on the wire counts; an error
    /// whose message happens to contain the code string does not qualify.
    #[must_use]
    pub fn is_serialization_failure(&self) -> bool {
        self.sql_state() == Some(&SqlState::T_R_SERIALIZATION_FAILURE)
    }

    /// Whether this is a unique-constraint violation (SQLSTATE 23505).
    /// Never retried; always distinguishable from a serialization failure.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        self.sql_state() == Some(&SqlState::UNIQUE_VIOLATION)
    }
}
