//! Transactional PostgreSQL data-access core.
//!
//! Executes SQL work through pooled connections with automatic retry of
//! serialization failures under repeatable-read and serializable isolation,
//! and provides three bulk-loading strategies: chunked multi-row
//! INSERT/UPSERT, UNNEST-driven array UPDATE, and streaming COPY into a
//! staging table folded into the target with conflict resolution.

pub mod bulk;
pub mod error;
pub mod handle;
pub mod pool;
pub mod prelude;
pub mod results;
mod sql;
pub mod stats;
pub mod transact;
pub mod value;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use bulk::{ConflictAction, DEFAULT_UPDATE_BATCH_ROWS};
pub use error::DbError;
pub use handle::{DbHandle, Prepared};
pub use pool::Database;
pub use results::{DbRow, ResultSet};
pub use sql::MAX_PARAMS_PER_STATEMENT;
pub use stats::RetryStats;
pub use transact::{IsolationLevel, MAX_TX_ATTEMPTS};
pub use value::SqlValue;
