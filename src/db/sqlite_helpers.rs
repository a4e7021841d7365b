//! SQLite helper utilities for type conversion
//!
//! SQLite has no boolean or JSON column types. Booleans are stored as 0/1
//! integers and structured values as JSON text. This module converts single
//! values between the record representation (`serde_json::Value`), bind
//! values (`SqlValue`) and row cells.

use serde_json::{Number, Value};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::error::{RepoError, Result};
use crate::orm::{FieldDef, FieldType, SqlValue};

// ============================================================================
// Boolean Helpers (SQLite uses 0/1 integers)
// ============================================================================

/// Convert bool to SQLite integer (0 or 1)
#[inline]
pub fn bool_to_int(b: bool) -> i64 {
    if b { 1 } else { 0 }
}

/// Convert SQLite integer to bool
#[inline]
pub fn int_to_bool(i: i64) -> bool {
    i != 0
}

// ============================================================================
// JSON Helpers (stored as TEXT in SQLite)
// ============================================================================

/// Serialize a structured value to JSON text
#[inline]
pub fn to_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Parse stored JSON text. Text that is not valid JSON is returned as a string.
#[inline]
pub fn from_json(s: &str) -> Value {
    serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()))
}

// ============================================================================
// Record value -> bind value
// ============================================================================

/// Convert a record value to the bind value for `field`.
///
/// Lenient where the intent is unambiguous (`"5"` for an integer, `1` for a
/// boolean); anything else is an `InvalidType` error naming the field.
pub fn value_to_sql(field: &FieldDef, value: &Value) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    let converted = match field.field_type {
        FieldType::Text => match value {
            Value::String(s) => Some(SqlValue::String(s.clone())),
            Value::Number(n) => Some(SqlValue::String(n.to_string())),
            Value::Bool(b) => Some(SqlValue::String(b.to_string())),
            _ => None,
        },
        FieldType::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(SqlValue::Int),
            Value::String(s) => s.trim().parse::<i64>().ok().map(SqlValue::Int),
            Value::Bool(b) => Some(SqlValue::Int(bool_to_int(*b))),
            _ => None,
        },
        FieldType::Real => match value {
            Value::Number(n) => n.as_f64().map(SqlValue::Float),
            Value::String(s) => s.trim().parse::<f64>().ok().map(SqlValue::Float),
            _ => None,
        },
        FieldType::Boolean => match value {
            Value::Bool(b) => Some(SqlValue::Bool(*b)),
            Value::Number(n) => n.as_i64().map(|i| SqlValue::Bool(int_to_bool(i))),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(SqlValue::Bool(true)),
                "false" | "0" => Some(SqlValue::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        FieldType::Json => Some(SqlValue::String(to_json(value))),
    };

    converted.ok_or_else(|| {
        RepoError::InvalidType(format!(
            "field '{}' expects {:?}, got {}",
            field.name, field.field_type, value
        ))
    })
}

/// Convert a bind value back to its record form for `field`.
pub fn sql_to_value(field: &FieldDef, value: &SqlValue) -> Value {
    match (field.field_type, value) {
        (_, SqlValue::Null) => Value::Null,
        (FieldType::Boolean, SqlValue::Int(i)) => Value::Bool(int_to_bool(*i)),
        (FieldType::Json, SqlValue::String(s)) => from_json(s),
        (_, SqlValue::String(s)) => Value::String(s.clone()),
        (_, SqlValue::Int(i)) => Value::from(*i),
        (_, SqlValue::Float(f)) => float_value(*f),
        (_, SqlValue::Bool(b)) => Value::Bool(*b),
    }
}

// ============================================================================
// Row cell -> record value
// ============================================================================

/// Read the column for `field` from a row.
pub fn cell_to_value(row: &SqliteRow, field: &FieldDef) -> Result<Value> {
    let name = field.name.as_str();
    let value = match field.field_type {
        FieldType::Text => row
            .try_get_unchecked::<Option<String>, _>(name)?
            .map_or(Value::Null, Value::String),
        FieldType::Integer => row
            .try_get_unchecked::<Option<i64>, _>(name)?
            .map_or(Value::Null, Value::from),
        FieldType::Real => row
            .try_get_unchecked::<Option<f64>, _>(name)?
            .map_or(Value::Null, float_value),
        FieldType::Boolean => row
            .try_get_unchecked::<Option<i64>, _>(name)?
            .map_or(Value::Null, |i| Value::Bool(int_to_bool(i))),
        FieldType::Json => row
            .try_get_unchecked::<Option<String>, _>(name)?
            .map_or(Value::Null, |s| from_json(&s)),
    };
    Ok(value)
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}
