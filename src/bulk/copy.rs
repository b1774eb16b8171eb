use futures_util::{SinkExt, Stream, StreamExt, pin_mut};
use tokio_util::bytes::{Bytes, BytesMut};

use crate::error::DbError;
use crate::handle::DbHandle;
use crate::sql::{
    check_columns, check_ident, copy_statement, create_staging_statement, drop_column_statement,
    encode_copy_row, fold_statement, staging_table_name, upsert_clause,
};
use crate::value::SqlValue;

/// Flush the COPY buffer to the sink once it grows past this size.
const COPY_FLUSH_BYTES: usize = 1 << 20;

impl DbHandle<'_> {
    /// Stage an unbounded row stream into a transaction-scoped temporary
    /// table via `COPY FROM STDIN`, then fold it into `table` with
    /// `INSERT … SELECT … ON CONFLICT (conflict_columns) DO UPDATE` over
    /// every copied column. Returns the row count of the fold.
    ///
    /// COPY does not evaluate uniqueness against the target during upload;
    /// staging-then-folding is what buys both copy throughput and upsert
    /// semantics. `drop_column` removes a server-generated identity column
    /// from the staging shape so the producer does not have to supply it.
    ///
    /// Stream items are `Result`s: iteration stops at the first error item,
    /// that error becomes the call's result, and the fold is not attempted
    /// (dropping the sink aborts the upload; the surrounding transaction
    /// rolls the staging work back).
    ///
    /// # Errors
    /// `DbError::TransactionRequired` when the handle is not bound to a
    /// transaction — the staging table is session-scoped and only safe
    /// inside one. `DbError::InputShape` for malformed identifiers or a row
    /// whose width differs from `columns`.
    pub async fn copy_upsert<S>(
        &self,
        table: &str,
        columns: &[&str],
        rows: S,
        conflict_columns: &[&str],
        drop_column: Option<&str>,
    ) -> Result<u64, DbError>
    where
        S: Stream<Item = Result<Vec<SqlValue>, DbError>>,
    {
        let tx = self.require_transaction("copy_upsert")?;
        check_ident(table, true)?;
        if columns.is_empty() {
            return Err(DbError::InputShape(
                "column list may not be empty".to_string(),
            ));
        }
        check_columns(columns)?;
        if conflict_columns.is_empty() {
            return Err(DbError::InputShape(
                "copy-upsert requires at least one conflict column".to_string(),
            ));
        }
        check_columns(conflict_columns)?;
        if let Some(col) = drop_column {
            check_ident(col, false)?;
        }

        let staging = staging_table_name(table);
        tx.batch_execute(&create_staging_statement(&staging, table))
            .await?;
        if let Some(col) = drop_column {
            tx.batch_execute(&drop_column_statement(&staging, col))
                .await?;
        }

        let copy_sql = copy_statement(&staging, columns);
        let sink = tx.copy_in::<_, Bytes>(copy_sql.as_str()).await?;
        pin_mut!(sink);
        pin_mut!(rows);

        let mut buf = BytesMut::with_capacity(COPY_FLUSH_BYTES);
        let mut staged: u64 = 0;
        while let Some(item) = rows.next().await {
            let row = item?;
            if row.len() != columns.len() {
                return Err(DbError::InputShape(format!(
                    "row {staged} has {} values, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            encode_copy_row(&mut buf, &row);
            staged += 1;
            if buf.len() >= COPY_FLUSH_BYTES {
                sink.send(buf.split().freeze()).await?;
            }
        }
        if !buf.is_empty() {
            sink.send(buf.split().freeze()).await?;
        }
        sink.finish().await?;
        tracing::debug!(table, staging = %staging, rows = staged, "staged rows via COPY");

        let clause = upsert_clause(conflict_columns, columns);
        let folded = tx
            .execute(fold_statement(table, &staging, columns, &clause).as_str(), &[])
            .await?;
        Ok(folded)
    }
}
