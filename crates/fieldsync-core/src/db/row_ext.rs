//! Nullable column helpers

use crate::error::{Error, Result};
use libsql::{Row, Value as SqlValue};

pub(crate) fn nullable_text(value: Option<String>) -> SqlValue {
    value.map_or(SqlValue::Null, SqlValue::Text)
}

pub(crate) fn nullable_int(value: Option<i64>) -> SqlValue {
    value.map_or(SqlValue::Null, SqlValue::Integer)
}

pub(crate) fn opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        SqlValue::Null => Ok(None),
        SqlValue::Text(text) => Ok(Some(text)),
        other => Err(Error::Database(format!(
            "column {idx}: expected TEXT or NULL, found {other:?}"
        ))),
    }
}

pub(crate) fn opt_int(row: &Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        SqlValue::Null => Ok(None),
        SqlValue::Integer(value) => Ok(Some(value)),
        other => Err(Error::Database(format!(
            "column {idx}: expected INTEGER or NULL, found {other:?}"
        ))),
    }
}
