//! Convenient imports for common functionality.

pub use crate::bulk::{ConflictAction, DEFAULT_UPDATE_BATCH_ROWS};
pub use crate::error::DbError;
pub use crate::handle::{DbHandle, Prepared};
pub use crate::pool::Database;
pub use crate::results::{DbRow, ResultSet};
pub use crate::stats::RetryStats;
pub use crate::transact::{IsolationLevel, MAX_TX_ATTEMPTS};
pub use crate::value::SqlValue;
pub use crate::MAX_PARAMS_PER_STATEMENT;
