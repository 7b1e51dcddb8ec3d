//! Text encoding of dataset cells in raw-data files.
//!
//! | type      | encoding                                  |
//! |-----------|-------------------------------------------|
//! | null      | `\N`                                      |
//! | integer   | decimal                                   |
//! | float     | shortest representation that reparses to the same `f64` |
//! | text      | as is, a leading `\` doubled              |
//! | boolean   | `true` / `false`                          |
//! | timestamp | RFC 3339, microseconds, `Z` suffix        |
//!
//! Doubling a leading backslash keeps text such as `\N` apart from the null
//! marker.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::model::{ColumnType, Value};

pub(crate) const NULL_MARKER: &str = "\\N";
const ESCAPE: char = '\\';

pub(crate) fn encode_field(value: &Value) -> String {
    match value {
        Value::Null => NULL_MARKER.to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Text(s) if s.starts_with(ESCAPE) => format!("{}{}", ESCAPE, s),
        Value::Text(s) => s.clone(),
        Value::Boolean(b) => b.to_string(),
        Value::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Micros, true),
    }
}

pub(crate) fn decode_field(raw: &str, ty: ColumnType) -> Result<Value, String> {
    if raw == NULL_MARKER {
        return Ok(Value::Null);
    }
    match ty {
        ColumnType::Integer => raw
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| format!("'{}' is not an integer: {}", raw, e)),
        ColumnType::Float => raw
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| format!("'{}' is not a float: {}", raw, e)),
        ColumnType::Text => Ok(Value::Text(
            raw.strip_prefix(ESCAPE).unwrap_or(raw).to_string(),
        )),
        ColumnType::Boolean => match raw {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(format!("'{}' is not a boolean", raw)),
        },
        ColumnType::Timestamp => DateTime::parse_from_rfc3339(raw)
            .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
            .map_err(|e| format!("'{}' is not a timestamp: {}", raw, e)),
    }
}
