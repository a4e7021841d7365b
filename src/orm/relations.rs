//! Eager relation loading
//!
//! Relations are loaded in one query per relation for a whole batch of
//! records (no N+1), then attached to each record under the relation name:
//! a list for one-to-many and many-to-many, an object or null otherwise.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::builder::{EntityQuery, Statement};
use super::descriptor::{EntityDescriptor, FieldDef, JoinTable, RelationDef, SortSpec};
use super::record::{Record, decode_row};
use super::traits::{SortDirection, SqlValue};
use crate::db::Executor;
use crate::db::sqlite_helpers::{cell_to_value, value_to_sql};
use crate::error::{RepoError, Result};

/// Alias of the join-table key column in many-to-many queries
const LINK_COLUMN: &str = "__link";

/// Relations to load: defaults first, then `requested`, without duplicates.
pub fn resolve_names(entity: &EntityDescriptor, requested: &[String]) -> Result<Vec<String>> {
    let mut names: Vec<String> = entity
        .relations()
        .iter()
        .filter(|r| r.include_by_default)
        .map(|r| r.name.clone())
        .collect();

    for name in requested {
        if entity.relation(name).is_none() {
            return Err(RepoError::Configuration(format!(
                "{}: unknown relation '{}'",
                entity.name(),
                name
            )));
        }
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    Ok(names)
}

/// Load `names` for every record and attach them in place.
pub async fn load(
    exec: &Executor,
    entity: &EntityDescriptor,
    records: &mut [Record],
    names: &[String],
) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    for name in names {
        let relation = entity.relation(name).ok_or_else(|| {
            RepoError::Configuration(format!("{}: unknown relation '{}'", entity.name(), name))
        })?;
        let Some(local) = entity.field(&relation.local_field) else {
            continue;
        };
        let target = (relation.target)()?;

        let keys = local_keys(local, records)?;
        let related = if keys.is_empty() {
            HashMap::new()
        } else {
            match &relation.join {
                Some(join) => fetch_through(exec, &target, relation, join, local, keys).await?,
                None => fetch_direct(exec, &target, relation, keys).await?,
            }
        };

        tracing::debug!(
            entity = entity.name(),
            relation = %relation.name,
            groups = related.len(),
            "Loaded relation"
        );

        for record in records.iter_mut() {
            let key = record
                .get(&local.name)
                .map(|v| value_to_sql(local, v))
                .transpose()?
                .filter(|k| !k.is_null())
                .map(|k| k.as_text());
            let matches = key.and_then(|k| related.get(&k).cloned()).unwrap_or_default();
            let value = if relation.kind.is_multiple() {
                Value::Array(matches.into_iter().map(Value::Object).collect())
            } else {
                matches.into_iter().next().map_or(Value::Null, Value::Object)
            };
            record.insert(relation.name.clone(), value);
        }
    }
    Ok(())
}

/// Distinct non-null values of the local field
fn local_keys(local: &FieldDef, records: &[Record]) -> Result<Vec<SqlValue>> {
    let mut seen = std::collections::HashSet::new();
    let mut keys = Vec::new();
    for record in records {
        let Some(value) = record.get(&local.name) else {
            continue;
        };
        let key = value_to_sql(local, value)?;
        if !key.is_null() && seen.insert(key.as_text()) {
            keys.push(key);
        }
    }
    Ok(keys)
}

fn target_order(target: &EntityDescriptor) -> Vec<SortSpec> {
    let sort = target.default_sort().cloned().unwrap_or_else(|| SortSpec {
        field: target.id_field().to_string(),
        direction: SortDirection::Asc,
    });
    vec![sort]
}

/// Target rows whose `foreign_field` holds one of `keys`, grouped by that value
async fn fetch_direct(
    exec: &Executor,
    target: &Arc<EntityDescriptor>,
    relation: &RelationDef,
    keys: Vec<SqlValue>,
) -> Result<HashMap<String, Vec<Record>>> {
    let foreign = target.field(&relation.foreign_field).ok_or_else(|| {
        RepoError::Configuration(format!(
            "relation '{}': '{}' is not a field of {}",
            relation.name,
            relation.foreign_field,
            target.name()
        ))
    })?;

    let statement = EntityQuery::new(Arc::clone(target))
        .where_in(&foreign.name, keys)
        .order_by(&target_order(target))
        .build_select();

    let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
    for row in exec.fetch_all(&statement).await? {
        let record = decode_row(target, &row)?;
        let key = record
            .get(&foreign.name)
            .map(|v| value_to_sql(foreign, v))
            .transpose()?
            .unwrap_or(SqlValue::Null);
        if !key.is_null() {
            grouped.entry(key.as_text()).or_default().push(record);
        }
    }
    Ok(grouped)
}

/// Target rows linked through a join table, grouped by the owning key
async fn fetch_through(
    exec: &Executor,
    target: &Arc<EntityDescriptor>,
    relation: &RelationDef,
    join: &JoinTable,
    local: &FieldDef,
    keys: Vec<SqlValue>,
) -> Result<HashMap<String, Vec<Record>>> {
    if target.field(&relation.foreign_field).is_none() {
        return Err(RepoError::Configuration(format!(
            "relation '{}': '{}' is not a field of {}",
            relation.name,
            relation.foreign_field,
            target.name()
        )));
    }

    let columns: Vec<String> = target
        .fields()
        .iter()
        .map(|f| format!("t.{}", f.name))
        .collect();
    let order: Vec<String> = target_order(target)
        .iter()
        .map(|s| format!("t.{} {}", s.field, s.direction.to_sql()))
        .collect();
    let placeholders = vec!["?"; keys.len()].join(", ");
    let sql = format!(
        "SELECT {}, j.{} AS {} FROM {} t INNER JOIN {} j ON j.{} = t.{} WHERE j.{} IN ({}) ORDER BY {}",
        columns.join(", "),
        join.local_key,
        LINK_COLUMN,
        target.table(),
        join.table,
        join.foreign_key,
        relation.foreign_field,
        join.local_key,
        placeholders,
        order.join(", ")
    );
    let statement = Statement { sql, values: keys };

    let link = FieldDef::new(LINK_COLUMN, local.field_type);
    let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
    for row in exec.fetch_all(&statement).await? {
        let record = decode_row(target, &row)?;
        let key = value_to_sql(local, &cell_to_value(&row, &link)?)?;
        if !key.is_null() {
            grouped.entry(key.as_text()).or_default().push(record);
        }
    }
    Ok(grouped)
}
