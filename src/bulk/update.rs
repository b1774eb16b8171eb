use tokio_postgres::types::ToSql;

use crate::error::DbError;
use crate::handle::DbHandle;
use crate::sql::{check_columns, check_ident, check_type_name, unnest_update_statement};
use crate::value::SqlValue;

/// Default maximum rows per UNNEST update statement. Bounds single-statement
/// size; arrays count as one parameter each, so the limit here is statement
/// bloat rather than the positional-parameter ceiling.
pub const DEFAULT_UPDATE_BATCH_ROWS: usize = 10_000;

impl DbHandle<'_> {
    /// Update many rows of `table` in one round trip per batch, matching on
    /// `columns[0]`. `values` is columnar: one slice per column, all of
    /// equal length. `types` gives the Postgres type of each column for the
    /// explicit UNNEST casts. Returns the total affected row count.
    ///
    /// # Errors
    /// `DbError::InputShape` before any store access when fewer than two
    /// columns are given, the slice lengths differ, `types` does not match
    /// `columns`, or an identifier or type name is malformed.
    pub async fn bulk_update(
        &self,
        table: &str,
        columns: &[&str],
        types: &[&str],
        values: &[Vec<SqlValue>],
    ) -> Result<u64, DbError> {
        self.bulk_update_with_batch_size(table, columns, types, values, DEFAULT_UPDATE_BATCH_ROWS)
            .await
    }

    /// [`bulk_update`](Self::bulk_update) with an explicit per-statement row
    /// bound.
    ///
    /// # Errors
    /// As [`bulk_update`](Self::bulk_update), plus `DbError::InputShape`
    /// when `max_rows` is zero.
    pub async fn bulk_update_with_batch_size(
        &self,
        table: &str,
        columns: &[&str],
        types: &[&str],
        values: &[Vec<SqlValue>],
        max_rows: usize,
    ) -> Result<u64, DbError> {
        check_ident(table, true)?;
        if columns.len() < 2 {
            return Err(DbError::InputShape(
                "bulk update needs a match-key column and at least one value column".to_string(),
            ));
        }
        check_columns(columns)?;
        if types.len() != columns.len() {
            return Err(DbError::InputShape(format!(
                "type count {} does not match column count {}",
                types.len(),
                columns.len()
            )));
        }
        for ty in types {
            check_type_name(ty)?;
        }
        if values.len() != columns.len() {
            return Err(DbError::InputShape(format!(
                "value column count {} does not match column count {}",
                values.len(),
                columns.len()
            )));
        }
        let rows = values[0].len();
        if values.iter().any(|col| col.len() != rows) {
            return Err(DbError::InputShape(
                "per-column value slices must have equal length".to_string(),
            ));
        }
        if max_rows == 0 {
            return Err(DbError::InputShape(
                "batch size must be at least one row".to_string(),
            ));
        }
        if rows == 0 {
            return Ok(0);
        }

        let sql = unnest_update_statement(table, columns, types);
        let target = self.bulk_target().await?;
        // Identical statement text for every batch width, so one prepared
        // statement serves all chunks.
        let stmt = target.prepare(&sql).await?;

        let mut affected: u64 = 0;
        let mut start = 0usize;
        while start < rows {
            let end = usize::min(start + max_rows, rows);
            let slices: Vec<&[SqlValue]> = values.iter().map(|col| &col[start..end]).collect();
            let refs: Vec<&(dyn ToSql + Sync)> =
                slices.iter().map(|s| s as &(dyn ToSql + Sync)).collect();
            affected += target
                .execute(&stmt, &refs)
                .await
                .map_err(|e| DbError::BatchFailed {
                    table: table.to_string(),
                    rows: start..end,
                    source: Box::new(e),
                })?;
            start = end;
        }

        tracing::debug!(table, rows, affected, "bulk update complete");
        Ok(affected)
    }
}
