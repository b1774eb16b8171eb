use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

use crate::error::DbError;
use crate::value::SqlValue;

/// A single row from a query result.
///
/// Column names are shared across all rows of a result set; a name-to-index
/// cache avoids repeated string comparison on lookup.
#[derive(Debug, Clone)]
pub struct DbRow {
    column_names: Arc<Vec<String>>,
    values: Vec<SqlValue>,
    column_index: Arc<HashMap<String, usize>>,
}

impl DbRow {
    pub(crate) fn new(
        column_names: Arc<Vec<String>>,
        column_index: Arc<HashMap<String, usize>>,
        values: Vec<SqlValue>,
    ) -> Self {
        Self {
            column_names,
            values,
            column_index,
        }
    }

    /// The column names of this row, in result order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Get a value by column name.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&SqlValue> {
        self.column_index
            .get(column_name)
            .and_then(|&idx| self.values.get(idx))
    }

    /// Get a value by column position.
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// All values of this row, in column order.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

/// Rows returned by a query, plus the affected-row count for DML.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub rows: Vec<DbRow>,
    pub rows_affected: u64,
}

impl ResultSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Build a `ResultSet` from raw tokio-postgres rows.
pub(crate) fn build_result_set(rows: &[tokio_postgres::Row]) -> Result<ResultSet, DbError> {
    let mut result = ResultSet {
        rows: Vec::with_capacity(rows.len()),
        rows_affected: rows.len() as u64,
    };
    let Some(first) = rows.first() else {
        return Ok(result);
    };

    let column_names: Arc<Vec<String>> = Arc::new(
        first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
    );
    let column_index: Arc<HashMap<String, usize>> = Arc::new(
        column_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect(),
    );

    for row in rows {
        let mut values = Vec::with_capacity(row.columns().len());
        for idx in 0..row.columns().len() {
            values.push(extract_value(row, idx)?);
        }
        result.rows.push(DbRow::new(
            Arc::clone(&column_names),
            Arc::clone(&column_index),
            values,
        ));
    }

    Ok(result)
}

/// Extract a `SqlValue` from a row at the given column index, dispatching on
/// the column's Postgres type name.
pub(crate) fn extract_value(
    row: &tokio_postgres::Row,
    idx: usize,
) -> Result<SqlValue, DbError> {
    let type_name = row.columns()[idx].type_().name();

    let value = match type_name {
        "int2" => {
            let v: Option<i16> = row.try_get(idx)?;
            v.map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v)))
        }
        "int4" => {
            let v: Option<i32> = row.try_get(idx)?;
            v.map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v)))
        }
        "int8" => {
            let v: Option<i64> = row.try_get(idx)?;
            v.map_or(SqlValue::Null, SqlValue::Int)
        }
        "float4" => {
            let v: Option<f32> = row.try_get(idx)?;
            v.map_or(SqlValue::Null, |v| SqlValue::Float(f64::from(v)))
        }
        "float8" => {
            let v: Option<f64> = row.try_get(idx)?;
            v.map_or(SqlValue::Null, SqlValue::Float)
        }
        "bool" => {
            let v: Option<bool> = row.try_get(idx)?;
            v.map_or(SqlValue::Null, SqlValue::Bool)
        }
        "timestamp" => {
            let v: Option<NaiveDateTime> = row.try_get(idx)?;
            v.map_or(SqlValue::Null, SqlValue::Timestamp)
        }
        "timestamptz" => {
            let v: Option<chrono::DateTime<chrono::Utc>> = row.try_get(idx)?;
            v.map_or(SqlValue::Null, |v| SqlValue::Timestamp(v.naive_utc()))
        }
        "json" | "jsonb" => {
            let v: Option<JsonValue> = row.try_get(idx)?;
            v.map_or(SqlValue::Null, SqlValue::Json)
        }
        "bytea" => {
            let v: Option<Vec<u8>> = row.try_get(idx)?;
            v.map_or(SqlValue::Null, SqlValue::Bytes)
        }
        _ => {
            // text, varchar, char, and anything else that reads as a string
            let v: Option<String> = row.try_get(idx)?;
            v.map_or(SqlValue::Null, SqlValue::Text)
        }
    };

    Ok(value)
}
