//! Schema synchronization from entity descriptors
//!
//! - Creates missing tables
//! - Adds missing columns
//! - Creates join tables for many-to-many relations
//! - Does NOT handle column renames or type changes

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::orm::{EntityDescriptor, FieldDef, RelationKind};

/// Result of a schema sync operation
#[derive(Debug, Default)]
pub struct SchemaSyncResult {
    pub tables_created: Vec<String>,
    pub columns_added: Vec<(String, String)>, // (table, column)
    pub errors: Vec<String>,
}

impl SchemaSyncResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check if a table exists in the database
async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool, sqlx::Error> {
    let result: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table_name)
            .fetch_optional(pool)
            .await?;

    Ok(result.is_some())
}

/// Get existing columns for a table
async fn get_table_columns(
    pool: &SqlitePool,
    table_name: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(i32, String, String, i32, Option<String>, i32)> =
        sqlx::query_as(&format!("PRAGMA table_info({})", table_name))
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(_, name, _, _, _, _)| name).collect())
}

async fn run_ddl(pool: &SqlitePool, sql: &str, result: &mut SchemaSyncResult) -> bool {
    debug!(sql = %sql, "Executing schema statement");
    match sqlx::query(sql).execute(pool).await {
        Ok(_) => true,
        Err(e) => {
            let msg = format!("Schema statement failed ({}): {}", sql, e);
            warn!("{}", msg);
            result.errors.push(msg);
            false
        }
    }
}

/// Sync one entity's table, and its many-to-many join tables, to the database
pub async fn sync_entity(
    pool: &SqlitePool,
    entity: &EntityDescriptor,
) -> Result<SchemaSyncResult, sqlx::Error> {
    let mut result = SchemaSyncResult::default();
    let table_name = entity.table();

    if !table_exists(pool, table_name).await? {
        if run_ddl(pool, &entity.create_table_sql(), &mut result).await {
            info!("Created table: {}", table_name);
            result.tables_created.push(table_name.to_string());
        }
    } else {
        let existing_columns = get_table_columns(pool, table_name).await?;
        for field in entity.fields() {
            if existing_columns.iter().any(|c| c == &field.name) {
                continue;
            }
            if run_ddl(pool, &generate_add_column_sql(table_name, field), &mut result).await {
                info!("Added column {}.{}", table_name, field.name);
                result
                    .columns_added
                    .push((table_name.to_string(), field.name.clone()));
            }
        }
    }

    for relation in entity.relations() {
        let (RelationKind::ManyToMany, Some(join)) = (relation.kind, &relation.join) else {
            continue;
        };
        if table_exists(pool, &join.table).await? {
            continue;
        }

        let local_type = entity
            .field(&relation.local_field)
            .map_or("TEXT", |f| f.field_type.sql_type());
        let foreign_type = (relation.target)()
            .ok()
            .and_then(|target| target.field(&relation.foreign_field).map(|f| f.field_type.sql_type()))
            .unwrap_or("TEXT");
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {} {} NOT NULL,\n  {} {} NOT NULL,\n  PRIMARY KEY ({}, {})\n)",
            join.table,
            join.local_key,
            local_type,
            join.foreign_key,
            foreign_type,
            join.local_key,
            join.foreign_key
        );
        if run_ddl(pool, &sql, &mut result).await {
            info!("Created join table: {}", join.table);
            result.tables_created.push(join.table.clone());
        }
    }

    Ok(result)
}

/// Generate ALTER TABLE ADD COLUMN SQL
fn generate_add_column_sql(table_name: &str, field: &FieldDef) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        table_name,
        field.name,
        field.field_type.sql_type()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::orm::FieldType;

    fn widget(with_color: bool) -> EntityDescriptor {
        let mut builder = EntityDescriptor::builder("Widget", "widgets")
            .field(FieldDef::new("id", FieldType::Integer))
            .field(FieldDef::new("name", FieldType::Text));
        if with_color {
            builder = builder.field(FieldDef::new("color", FieldType::Text));
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_creates_then_extends_table() {
        let db = Database::in_memory().await.unwrap();

        let first = sync_entity(db.pool(), &widget(false)).await.unwrap();
        assert_eq!(first.tables_created, vec!["widgets".to_string()]);
        assert!(first.is_clean());

        let second = sync_entity(db.pool(), &widget(true)).await.unwrap();
        assert!(second.tables_created.is_empty());
        assert_eq!(
            second.columns_added,
            vec![("widgets".to_string(), "color".to_string())]
        );

        let third = sync_entity(db.pool(), &widget(true)).await.unwrap();
        assert!(third.columns_added.is_empty());
    }
}
