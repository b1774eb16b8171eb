//! Bulk-loading strategies: chunked multi-row INSERT/UPSERT, UNNEST-driven
//! array UPDATE, and streaming COPY into a staging table folded into the
//! target with conflict resolution.

pub mod copy;
pub mod insert;
pub mod update;

pub use insert::ConflictAction;
pub use update::DEFAULT_UPDATE_BATCH_ROWS;
