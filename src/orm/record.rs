//! Records: the untyped form of an entity
//!
//! A record is the serde map of an entity, keyed by field name. Typed values
//! pass through `serde_json` on their way in and out of the store, so one
//! code path serves every entity type.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;

use super::descriptor::{EntityDescriptor, FieldType};
use super::traits::SqlValue;
use crate::db::sqlite_helpers::{cell_to_value, value_to_sql};
use crate::error::{RepoError, Result};

pub type Record = Map<String, Value>;

/// Serialize an entity into its record.
pub fn to_record<T: Serialize>(entity: &T) -> Result<Record> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(RepoError::InvalidType(format!(
            "entity serialized to {}, expected an object",
            kind_of(&other)
        ))),
        Err(e) => Err(RepoError::InvalidType(e.to_string())),
    }
}

/// Deserialize a record into an entity.
pub fn from_record<T: DeserializeOwned>(record: Record) -> Result<T> {
    serde_json::from_value(Value::Object(record)).map_err(|e| RepoError::InvalidType(e.to_string()))
}

/// Decode every descriptor column of `row` into a record.
pub fn decode_row(entity: &EntityDescriptor, row: &SqliteRow) -> Result<Record> {
    let mut record = Record::new();
    for field in entity.fields() {
        record.insert(field.name.clone(), cell_to_value(row, field)?);
    }
    Ok(record)
}

/// Column/value pairs for an INSERT.
///
/// Every declared field present in the record is written, except a null or
/// blank id, which is left for the store to assign. Keys that are not
/// declared fields (relations, computed values) are ignored.
pub fn insert_columns(entity: &EntityDescriptor, record: &Record) -> Result<Vec<(String, SqlValue)>> {
    let mut columns = Vec::new();
    for field in entity.fields() {
        let Some(value) = record.get(&field.name) else {
            continue;
        };
        if field.name == entity.id_field() && is_blank(value) {
            continue;
        }
        columns.push((field.name.clone(), value_to_sql(field, value)?));
    }
    Ok(columns)
}

/// Column/value pairs for an UPDATE: every declared non-id field in the record.
pub fn update_columns(entity: &EntityDescriptor, record: &Record) -> Result<Vec<(String, SqlValue)>> {
    let mut columns = Vec::new();
    for field in entity.fields() {
        if field.name == entity.id_field() {
            continue;
        }
        if let Some(value) = record.get(&field.name) {
            columns.push((field.name.clone(), value_to_sql(field, value)?));
        }
    }
    Ok(columns)
}

/// Normalize an identifier to the id field's storage type.
pub fn key_value(entity: &EntityDescriptor, id: SqlValue) -> SqlValue {
    match (entity.id_def().field_type, id) {
        (FieldType::Integer, SqlValue::String(s)) => match s.trim().parse::<i64>() {
            Ok(i) => SqlValue::Int(i),
            Err(_) => SqlValue::String(s),
        },
        (FieldType::Text, SqlValue::Int(i)) => SqlValue::String(i.to_string()),
        (_, id) => id,
    }
}

/// Identifier of a stored record, in storage form.
pub fn record_key(entity: &EntityDescriptor, record: &Record) -> Result<SqlValue> {
    let value = record.get(entity.id_field()).unwrap_or(&Value::Null);
    value_to_sql(entity.id_def(), value)
}

/// Null, or a string that is empty after trimming
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
