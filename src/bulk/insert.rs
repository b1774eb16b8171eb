use tokio_postgres::Statement;

use crate::error::DbError;
use crate::handle::DbHandle;
use crate::results::{DbRow, build_result_set};
use crate::sql::{
    DO_NOTHING_CLAUSE, MAX_PARAMS_PER_STATEMENT, check_columns, check_ident, insert_statement,
    upsert_clause,
};
use crate::value::{SqlValue, to_sql_refs};

/// What to do when an inserted row collides with an existing unique key.
#[derive(Debug, Clone, Copy)]
pub enum ConflictAction<'a> {
    /// No conflict clause; collisions surface as constraint violations.
    Error,
    /// `ON CONFLICT DO NOTHING`: conflicting rows are silently skipped.
    Nothing,
    /// `ON CONFLICT (…) DO UPDATE`: every insert column is overwritten from
    /// the excluded row. Partial-column upserts are not supported.
    Upsert { conflict_columns: &'a [&'a str] },
}

impl ConflictAction<'_> {
    fn clause(&self, insert_columns: &[&str]) -> Result<String, DbError> {
        match self {
            ConflictAction::Error => Ok(String::new()),
            ConflictAction::Nothing => Ok(DO_NOTHING_CLAUSE.to_string()),
            ConflictAction::Upsert { conflict_columns } => {
                if conflict_columns.is_empty() {
                    return Err(DbError::InputShape(
                        "upsert requires at least one conflict column".to_string(),
                    ));
                }
                check_columns(conflict_columns)?;
                Ok(upsert_clause(conflict_columns, insert_columns))
            }
        }
    }
}

impl DbHandle<'_> {
    /// Insert `values` (row-major, `columns.len()` values per row) into
    /// `table`, chunked so no statement exceeds
    /// [`MAX_PARAMS_PER_STATEMENT`] positional parameters. Returns the total
    /// affected row count.
    ///
    /// All batches run on one connection (or the bound transaction); the
    /// full-width batch statement is prepared once and reused. Whether the
    /// effects of earlier batches survive a later batch failure is decided
    /// solely by whether the caller wrapped the call in a transaction.
    ///
    /// # Errors
    /// `DbError::InputShape` before any connection is acquired when the
    /// value count is not a multiple of the column count, the column list is
    /// empty or wider than the parameter ceiling, or an identifier is
    /// malformed. `DbError::BatchFailed` names the failing row range when a
    /// batch statement fails.
    pub async fn bulk_insert(
        &self,
        table: &str,
        columns: &[&str],
        values: &[SqlValue],
        conflict: ConflictAction<'_>,
    ) -> Result<u64, DbError> {
        self.bulk_insert_inner(table, columns, values, conflict, None, &mut no_scan)
            .await
    }

    /// Like [`bulk_insert`](Self::bulk_insert), with a `RETURNING` clause;
    /// `scan` is called once per returned row, in row order.
    ///
    /// # Errors
    /// As [`bulk_insert`](Self::bulk_insert); errors returned by `scan`
    /// abort the call.
    pub async fn bulk_insert_returning<F>(
        &self,
        table: &str,
        columns: &[&str],
        values: &[SqlValue],
        conflict: ConflictAction<'_>,
        returning: &[&str],
        mut scan: F,
    ) -> Result<u64, DbError>
    where
        F: FnMut(&DbRow) -> Result<(), DbError>,
    {
        if returning.is_empty() {
            return Err(DbError::InputShape(
                "returning column list may not be empty".to_string(),
            ));
        }
        self.bulk_insert_inner(table, columns, values, conflict, Some(returning), &mut scan)
            .await
    }

    async fn bulk_insert_inner(
        &self,
        table: &str,
        columns: &[&str],
        values: &[SqlValue],
        conflict: ConflictAction<'_>,
        returning: Option<&[&str]>,
        scan: &mut dyn FnMut(&DbRow) -> Result<(), DbError>,
    ) -> Result<u64, DbError> {
        check_ident(table, true)?;
        if columns.is_empty() {
            return Err(DbError::InputShape(
                "column list may not be empty".to_string(),
            ));
        }
        check_columns(columns)?;
        if let Some(cols) = returning {
            check_columns(cols)?;
        }
        if columns.len() > MAX_PARAMS_PER_STATEMENT {
            return Err(DbError::InputShape(format!(
                "{} columns exceed the {MAX_PARAMS_PER_STATEMENT}-parameter statement ceiling",
                columns.len()
            )));
        }
        if values.len() % columns.len() != 0 {
            return Err(DbError::InputShape(format!(
                "value count {} is not a multiple of column count {}",
                values.len(),
                columns.len()
            )));
        }
        let clause = conflict.clause(columns)?;
        if values.is_empty() {
            return Ok(0);
        }

        // Largest whole-row multiple that stays under the parameter ceiling.
        let stride = (MAX_PARAMS_PER_STATEMENT / columns.len()) * columns.len();

        let target = self.bulk_target().await?;
        let mut full_stmt = None;
        let mut affected: u64 = 0;
        let mut row_offset = 0usize;

        for chunk in values.chunks(stride) {
            let rows = chunk.len() / columns.len();
            let row_range = row_offset..row_offset + rows;

            let stmt = match &full_stmt {
                Some(stmt) if chunk.len() == stride => Statement::clone(stmt),
                _ => {
                    let sql = insert_statement(table, columns, rows, &clause, returning);
                    let stmt = target.prepare(&sql).await.map_err(|e| DbError::BatchFailed {
                        table: table.to_string(),
                        rows: row_range.clone(),
                        source: Box::new(e),
                    })?;
                    if chunk.len() == stride {
                        full_stmt = Some(stmt.clone());
                    }
                    stmt
                }
            };

            let refs = to_sql_refs(chunk);
            let batch_result = if returning.is_some() {
                match target.query(&stmt, &refs).await {
                    Ok(raw_rows) => {
                        let result_set = build_result_set(&raw_rows)?;
                        for row in &result_set.rows {
                            scan(row)?;
                        }
                        Ok(result_set.rows_affected)
                    }
                    Err(e) => Err(e),
                }
            } else {
                target.execute(&stmt, &refs).await
            };

            affected += batch_result.map_err(|e| DbError::BatchFailed {
                table: table.to_string(),
                rows: row_range,
                source: Box::new(e),
            })?;
            row_offset += rows;
        }

        tracing::debug!(table, rows = row_offset, affected, "bulk insert complete");
        Ok(affected)
    }
}

fn no_scan(_row: &DbRow) -> Result<(), DbError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_never_exceeds_parameter_ceiling() {
        for cols in 1..=MAX_PARAMS_PER_STATEMENT {
            let stride = (MAX_PARAMS_PER_STATEMENT / cols) * cols;
            assert!(stride <= MAX_PARAMS_PER_STATEMENT);
            assert_eq!(stride % cols, 0);
            assert!(stride + cols > MAX_PARAMS_PER_STATEMENT, "stride is maximal for {cols} columns");
        }
    }

    #[test]
    fn three_column_stride_is_999() {
        assert_eq!((MAX_PARAMS_PER_STATEMENT / 3) * 3, 999);
    }

    #[test]
    fn upsert_clause_covers_every_insert_column() {
        let clause = ConflictAction::Upsert {
            conflict_columns: &["k"],
        }
        .clause(&["k", "a", "b"])
        .expect("clause");
        assert_eq!(
            clause,
            " ON CONFLICT (k) DO UPDATE SET k=excluded.k, a=excluded.a, b=excluded.b"
        );
    }

    #[test]
    fn upsert_without_conflict_columns_is_rejected() {
        let err = ConflictAction::Upsert {
            conflict_columns: &[],
        }
        .clause(&["k", "a"])
        .expect_err("empty conflict columns");
        assert!(matches!(err, DbError::InputShape(_)));
    }
}
