use std::error::Error;

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_util::bytes;

/// A value bound as a statement parameter or read back from a result row.
///
/// This is the single value representation used throughout the crate, for
/// scalar parameters, array-update columns, COPY payloads, and result sets.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Text value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp without time zone
    Timestamp(NaiveDateTime),
    /// JSON / JSONB value
    Json(JsonValue),
    /// Binary data
    Bytes(Vec<u8>),
    /// NULL
    Null,
}

impl SqlValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let SqlValue::Int(v) = self { Some(*v) } else { None }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let SqlValue::Float(v) = self { Some(*v) } else { None }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let SqlValue::Text(v) = self { Some(v) } else { None }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(v) => Some(*v),
            SqlValue::Int(0) => Some(false),
            SqlValue::Int(1) => Some(true),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            SqlValue::Timestamp(v) => Some(*v),
            SqlValue::Text(s) => {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                    .ok()
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&JsonValue> {
        if let SqlValue::Json(v) = self { Some(v) } else { None }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        if let SqlValue::Bytes(v) = self { Some(v) } else { None }
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            SqlValue::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                _ => i.to_sql(ty, out),
            },
            SqlValue::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                _ => f.to_sql(ty, out),
            },
            SqlValue::Text(s) => s.to_sql(ty, out),
            SqlValue::Bool(b) => b.to_sql(ty, out),
            SqlValue::Timestamp(dt) => dt.to_sql(ty, out),
            SqlValue::Json(j) => j.to_sql(ty, out),
            SqlValue::Bytes(b) => b.to_sql(ty, out),
            SqlValue::Null => Ok(IsNull::Yes),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::TEXT
                | Type::VARCHAR
                | Type::CHAR
                | Type::NAME
                | Type::BOOL
                | Type::TIMESTAMP
                | Type::TIMESTAMPTZ
                | Type::DATE
                | Type::JSON
                | Type::JSONB
                | Type::BYTEA
        )
    }

    to_sql_checked!();
}

/// Borrow a parameter slice as the reference form tokio-postgres expects.
#[must_use]
pub fn to_sql_refs(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    let mut references: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(params.len());
    for p in params {
        references.push(p as &(dyn ToSql + Sync));
    }
    references
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_variants() {
        assert_eq!(SqlValue::Int(7).as_int(), Some(7));
        assert_eq!(SqlValue::Text("x".into()).as_text(), Some("x"));
        assert_eq!(SqlValue::Int(1).as_bool(), Some(true));
        assert_eq!(SqlValue::Int(0).as_bool(), Some(false));
        assert!(SqlValue::Null.is_null());
        assert!(SqlValue::Float(1.5).as_int().is_none());
    }

    #[test]
    fn timestamp_parses_from_text() {
        let v = SqlValue::Text("2021-08-06 16:00:00".into());
        assert!(v.as_timestamp().is_some());
        assert!(SqlValue::Text("not a time".into()).as_timestamp().is_none());
    }

    #[test]
    fn ref_conversion_preserves_order_and_len() {
        let params = vec![SqlValue::Int(1), SqlValue::Text("a".into()), SqlValue::Null];
        assert_eq!(to_sql_refs(&params).len(), 3);
    }
}
