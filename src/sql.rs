//! Dynamic statement assembly for the bulk builders.
//!
//! All identifiers and type names pass through a strict-charset check before
//! they are spliced into SQL; values only ever travel as bound parameters or
//! COPY fields, never as literals.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use tokio_util::bytes::BytesMut;

use crate::error::DbError;
use crate::value::SqlValue;

/// Hard ceiling on positional parameters per statement. A design constant
/// bounding statement size, deliberately below the protocol maximum.
pub const MAX_PARAMS_PER_STATEMENT: usize = 1_000;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Reject anything that is not a plain SQL identifier: letters, digits and
/// underscores, not starting with a digit. Dots are allowed for
/// schema-qualified table names when `allow_qualified` is set.
pub(crate) fn check_ident(name: &str, allow_qualified: bool) -> Result<(), DbError> {
    let mut start_of_part = true;
    for ch in name.chars() {
        let ok = match ch {
            'a'..='z' | 'A'..='Z' | '_' => true,
            '0'..='9' => !start_of_part,
            // Each dot-separated part must be non-empty, so a dot may not
            // open the name or follow another dot.
            '.' => allow_qualified && !start_of_part,
            _ => false,
        };
        if !ok {
            return Err(DbError::InputShape(format!("invalid identifier: {name:?}")));
        }
        start_of_part = ch == '.';
    }
    if name.is_empty() || start_of_part {
        return Err(DbError::InputShape(format!("invalid identifier: {name:?}")));
    }
    Ok(())
}

/// Validate a Postgres type name used in an UNNEST cast, e.g. `BIGINT`,
/// `TEXT`, `DOUBLE PRECISION`, `TIMESTAMP WITHOUT TIME ZONE`.
pub(crate) fn check_type_name(name: &str) -> Result<(), DbError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ','));
    if valid {
        Ok(())
    } else {
        Err(DbError::InputShape(format!("invalid type name: {name:?}")))
    }
}

pub(crate) fn check_columns(columns: &[&str]) -> Result<(), DbError> {
    for col in columns {
        check_ident(col, false)?;
    }
    Ok(())
}

/// `INSERT INTO t (c1, c2) VALUES ($1, $2), ($3, $4)` for `rows` rows, plus
/// an optional conflict action and RETURNING list.
pub(crate) fn insert_statement(
    table: &str,
    columns: &[&str],
    rows: usize,
    conflict: &str,
    returning: Option<&[&str]>,
) -> String {
    let mut sql = format!("INSERT INTO {table} ({}) VALUES ", columns.join(", "));
    let mut param = 1usize;
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for col in 0..columns.len() {
            if col > 0 {
                sql.push_str(", ");
            }
            let _ = write!(sql, "${param}");
            param += 1;
        }
        sql.push(')');
    }
    sql.push_str(conflict);
    if let Some(cols) = returning {
        let _ = write!(sql, " RETURNING {}", cols.join(", "));
    }
    sql
}

/// ` ON CONFLICT DO NOTHING`
pub(crate) const DO_NOTHING_CLAUSE: &str = " ON CONFLICT DO NOTHING";

/// ` ON CONFLICT (k1, k2) DO UPDATE SET c1=excluded.c1, c2=excluded.c2`
///
/// Every insert column is unconditionally overwritten on conflict; partial
/// upserts are not supported by this primitive.
pub(crate) fn upsert_clause(conflict_columns: &[&str], set_columns: &[&str]) -> String {
    let sets: Vec<String> = set_columns
        .iter()
        .map(|c| format!("{c}=excluded.{c}"))
        .collect();
    format!(
        " ON CONFLICT ({}) DO UPDATE SET {}",
        conflict_columns.join(", "),
        sets.join(", ")
    )
}

/// `UPDATE t SET c2 = data.c2 FROM (SELECT UNNEST($1::T1[]) AS k,
/// UNNEST($2::T2[]) AS c2) AS data WHERE t.k = data.k`
///
/// `columns[0]` is the match key; every column carries an explicit array
/// cast because UNNEST parameters are otherwise ambiguous to the planner.
pub(crate) fn unnest_update_statement(table: &str, columns: &[&str], types: &[&str]) -> String {
    let key = columns[0];
    let sets: Vec<String> = columns[1..]
        .iter()
        .map(|c| format!("{c} = data.{c}"))
        .collect();
    let unnests: Vec<String> = columns
        .iter()
        .zip(types.iter())
        .enumerate()
        .map(|(i, (c, t))| format!("UNNEST(${}::{t}[]) AS {c}", i + 1))
        .collect();
    format!(
        "UPDATE {table} SET {} FROM (SELECT {}) AS data WHERE {table}.{key} = data.{key}",
        sets.join(", "),
        unnests.join(", ")
    )
}

/// Staging-table name for the copy loader, `__t_copy` for target `t`.
pub(crate) fn staging_table_name(table: &str) -> String {
    format!("__{}_copy", table.replace('.', "_"))
}

/// Session-scoped staging table shaped like the target, dropped with the
/// transaction.
pub(crate) fn create_staging_statement(staging: &str, table: &str) -> String {
    format!("CREATE TEMPORARY TABLE {staging} (LIKE {table} INCLUDING DEFAULTS) ON COMMIT DROP")
}

pub(crate) fn drop_column_statement(staging: &str, column: &str) -> String {
    format!("ALTER TABLE {staging} DROP COLUMN {column}")
}

/// Text-format COPY into the staging table.
pub(crate) fn copy_statement(staging: &str, columns: &[&str]) -> String {
    format!("COPY {staging} ({}) FROM STDIN", columns.join(", "))
}

/// `INSERT INTO t (c1, c2) SELECT c1, c2 FROM __t_copy <conflict-action>`
pub(crate) fn fold_statement(
    table: &str,
    staging: &str,
    columns: &[&str],
    conflict: &str,
) -> String {
    let cols = columns.join(", ");
    format!("INSERT INTO {table} ({cols}) SELECT {cols} FROM {staging}{conflict}")
}

/// Append one row in COPY text format: tab-separated fields, `\N` for NULL,
/// backslash escapes for the delimiter characters.
pub(crate) fn encode_copy_row(buf: &mut BytesMut, row: &[SqlValue]) {
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            buf.extend_from_slice(b"\t");
        }
        match value {
            SqlValue::Null => buf.extend_from_slice(b"\\N"),
            other => {
                let field = copy_field_text(other);
                for byte in field.bytes() {
                    match byte {
                        b'\\' => buf.extend_from_slice(b"\\\\"),
                        b'\t' => buf.extend_from_slice(b"\\t"),
                        b'\n' => buf.extend_from_slice(b"\\n"),
                        b'\r' => buf.extend_from_slice(b"\\r"),
                        _ => buf.extend_from_slice(&[byte]),
                    }
                }
            }
        }
    }
    buf.extend_from_slice(b"\n");
}

fn copy_field_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Text(s) => s.clone(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::Timestamp(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        SqlValue::Json(j) => j.to_string(),
        SqlValue::Bytes(b) => {
            let mut s = String::with_capacity(2 + b.len() * 2);
            s.push_str("\\x");
            for byte in b {
                let _ = write!(s, "{byte:02x}");
            }
            s
        }
        SqlValue::Null => String::new(),
    }
}

const MAX_SUMMARY_LEN: usize = 120;

/// Whitespace-normalized statement summary, truncated for log lines.
pub(crate) fn summarize(sql: &str) -> String {
    truncate_summary(&WHITESPACE.replace_all(sql.trim(), " "))
}

/// Compact rendering of bound arguments for log lines, truncated like
/// statement summaries.
pub(crate) fn summarize_params(params: &[SqlValue]) -> String {
    let mut out = String::from("[");
    for (i, value) in params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        match value {
            SqlValue::Int(v) => {
                let _ = write!(out, "{v}");
            }
            SqlValue::Float(v) => {
                let _ = write!(out, "{v}");
            }
            SqlValue::Text(s) => {
                let _ = write!(out, "{s:?}");
            }
            SqlValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            SqlValue::Timestamp(dt) => {
                let _ = write!(out, "{dt}");
            }
            SqlValue::Json(j) => {
                let _ = write!(out, "{j}");
            }
            SqlValue::Bytes(b) => {
                let _ = write!(out, "<{} bytes>", b.len());
            }
            SqlValue::Null => out.push_str("NULL"),
        }
    }
    out.push(']');
    truncate_summary(&out)
}

fn truncate_summary(s: &str) -> String {
    if s.len() <= MAX_SUMMARY_LEN {
        s.to_string()
    } else {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i < MAX_SUMMARY_LEN)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}…", &s[..cut])
    }
}
