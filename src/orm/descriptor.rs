//! Entity descriptors
//!
//! Static metadata about one persisted type: table, fields and their
//! capabilities, identifier and owner fields, default sort and relations.
//! Built once at registration time and shared (via `Arc`) by every query and
//! repository for that entity.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use super::traits::SortDirection;
use crate::error::{RepoError, Result};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Real,
    /// Stored as INTEGER 0/1
    Boolean,
    /// Nested/structured value stored as JSON text
    Json,
}

impl FieldType {
    /// SQLite column type
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Text | FieldType::Json => "TEXT",
            FieldType::Integer | FieldType::Boolean => "INTEGER",
            FieldType::Real => "REAL",
        }
    }
}

/// Column definition and query capabilities of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub filterable: bool,
    pub sortable: bool,
    pub searchable: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            filterable: false,
            sortable: false,
            searchable: false,
        }
    }

    pub fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    /// Generate the column definition SQL
    fn to_sql(&self, is_primary_key: bool) -> String {
        let mut sql = format!("{} {}", self.name, self.field_type.sql_type());
        if is_primary_key {
            sql.push_str(" PRIMARY KEY");
            // Only INTEGER PRIMARY KEY aliases the rowid; other keys accept NULL otherwise.
            if self.field_type != FieldType::Integer {
                sql.push_str(" NOT NULL");
            }
        }
        sql
    }
}

/// Cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl RelationKind {
    /// Whether the relation materializes as a list
    pub fn is_multiple(&self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }
}

/// Link table for many-to-many relations.
///
/// `local_key` holds values of the owning entity's `local_field`,
/// `foreign_key` holds values of the target's `foreign_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub table: String,
    pub local_key: String,
    pub foreign_key: String,
}

/// Looks up the target entity's shared descriptor (see `descriptor_of`).
pub type DescriptorFn = fn() -> Result<Arc<EntityDescriptor>>;

/// A named association to another entity.
#[derive(Debug, Clone)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,
    pub target: DescriptorFn,
    pub local_field: String,
    pub foreign_field: String,
    pub include_by_default: bool,
    pub join: Option<JoinTable>,
}

impl RelationDef {
    pub fn new(
        name: impl Into<String>,
        kind: RelationKind,
        target: DescriptorFn,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            target,
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            include_by_default: false,
            join: None,
        }
    }

    pub fn include_by_default(mut self) -> Self {
        self.include_by_default = true;
        self
    }

    pub fn through(
        mut self,
        table: impl Into<String>,
        local_key: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.join = Some(JoinTable {
            table: table.into(),
            local_key: local_key.into(),
            foreign_key: foreign_key.into(),
        });
        self
    }
}

/// Default ordering for list queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Metadata about a database entity (table).
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    id_field: String,
    owner_field: Option<String>,
    fields: Vec<FieldDef>,
    default_sort: Option<SortSpec>,
    relations: Vec<RelationDef>,
}

impl EntityDescriptor {
    /// Start describing an entity called `name` stored in `table`.
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            name: name.into(),
            table: table.into(),
            id_field: None,
            owner_field: None,
            fields: Vec::new(),
            relations: Vec::new(),
            default_sort: None,
        }
    }

    /// Validate and assemble a descriptor.
    ///
    /// `fields` is the model shape. The id field defaults to `"id"`; the id
    /// and owner fields, the default sort field and every relation's local
    /// field must name declared fields.
    pub fn describe(
        name: impl Into<String>,
        table: impl Into<String>,
        fields: Vec<FieldDef>,
        id_field: Option<&str>,
        owner_field: Option<&str>,
        relations: Vec<RelationDef>,
        default_sort: Option<SortSpec>,
    ) -> Result<Self> {
        let name = name.into();
        let table = table.into();
        let config_err = |msg: String| RepoError::Configuration(format!("{name}: {msg}"));

        check_identifier(&table).map_err(config_err)?;
        if fields.is_empty() {
            return Err(config_err("no fields declared".to_string()));
        }
        for (i, field) in fields.iter().enumerate() {
            check_identifier(&field.name).map_err(config_err)?;
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(config_err(format!("duplicate field '{}'", field.name)));
            }
        }
        let has_field = |n: &str| fields.iter().any(|f| f.name == n);

        let id_field = id_field.unwrap_or("id").to_string();
        if !has_field(&id_field) {
            return Err(config_err(format!("id field '{id_field}' is not a field of the model")));
        }

        if let Some(owner) = owner_field {
            if !has_field(owner) {
                return Err(config_err(format!("owner field '{owner}' is not a field of the model")));
            }
        }

        if let Some(ref sort) = default_sort {
            if !has_field(&sort.field) {
                return Err(config_err(format!("default sort field '{}' is not a field of the model", sort.field)));
            }
        }

        for (i, relation) in relations.iter().enumerate() {
            check_identifier(&relation.foreign_field).map_err(config_err)?;
            if has_field(&relation.name) {
                return Err(config_err(format!("relation '{}' shadows a field", relation.name)));
            }
            if relations[..i].iter().any(|r| r.name == relation.name) {
                return Err(config_err(format!("duplicate relation '{}'", relation.name)));
            }
            if !has_field(&relation.local_field) {
                return Err(config_err(format!(
                    "relation '{}' local field '{}' is not a field of the model",
                    relation.name, relation.local_field
                )));
            }
            match (&relation.join, relation.kind) {
                (None, RelationKind::ManyToMany) => {
                    return Err(config_err(format!(
                        "many-to-many relation '{}' needs a join table",
                        relation.name
                    )));
                }
                (Some(join), _) => {
                    check_identifier(&join.table).map_err(config_err)?;
                    check_identifier(&join.local_key).map_err(config_err)?;
                    check_identifier(&join.foreign_key).map_err(config_err)?;
                }
                (None, _) => {}
            }
        }

        Ok(Self {
            name,
            table,
            id_field,
            owner_field: owner_field.map(str::to_string),
            fields,
            default_sort,
            relations,
        })
    }

    /// Entity name used in errors and logs
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn owner_field(&self) -> Option<&str> {
        self.owner_field.as_deref()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn id_def(&self) -> &FieldDef {
        // `describe` guarantees the id field is declared
        self.field(&self.id_field).unwrap_or(&self.fields[0])
    }

    pub fn filterable_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.filterable)
    }

    pub fn sortable_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.sortable)
    }

    pub fn searchable_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.searchable)
    }

    pub fn is_filterable(&self, name: &str) -> bool {
        self.field(name).is_some_and(|f| f.filterable)
    }

    pub fn is_sortable(&self, name: &str) -> bool {
        self.field(name).is_some_and(|f| f.sortable)
    }

    pub fn default_sort(&self) -> Option<&SortSpec> {
        self.default_sort.as_ref()
    }

    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Comma-separated column list for SELECT/RETURNING
    pub fn column_list(&self) -> String {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Build a SELECT query for all columns
    pub fn select_sql(&self) -> String {
        format!("SELECT {} FROM {}", self.column_list(), self.table)
    }

    /// Generate CREATE TABLE IF NOT EXISTS SQL
    pub fn create_table_sql(&self) -> String {
        let column_defs: Vec<String> = self
            .fields
            .iter()
            .map(|f| f.to_sql(f.name == self.id_field))
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            self.table,
            column_defs.join(",\n  ")
        )
    }
}

/// Builder front-end for [`EntityDescriptor::describe`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    name: String,
    table: String,
    id_field: Option<String>,
    owner_field: Option<String>,
    fields: Vec<FieldDef>,
    relations: Vec<RelationDef>,
    default_sort: Option<SortSpec>,
}

impl DescriptorBuilder {
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.id_field = Some(name.into());
        self
    }

    pub fn owner_field(mut self, name: impl Into<String>) -> Self {
        self.owner_field = Some(name.into());
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn default_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.default_sort = Some(SortSpec {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn build(self) -> Result<EntityDescriptor> {
        EntityDescriptor::describe(
            self.name,
            self.table,
            self.fields,
            self.id_field.as_deref(),
            self.owner_field.as_deref(),
            self.relations,
            self.default_sort,
        )
    }
}

fn check_identifier(name: &str) -> std::result::Result<(), String> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(format!("'{name}' is not a valid identifier"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn product() -> DescriptorBuilder {
        EntityDescriptor::builder("Product", "products")
            .field(FieldDef::new("id", FieldType::Integer).sortable())
            .field(FieldDef::new("name", FieldType::Text).filterable().sortable().searchable())
            .field(FieldDef::new("price", FieldType::Real).filterable().sortable())
            .field(FieldDef::new("user_id", FieldType::Text))
    }

    fn missing() -> Result<Arc<EntityDescriptor>> {
        Err(RepoError::Configuration("unused".into()))
    }

    #[test]
    fn test_defaults_to_id_field() {
        let d = product().build().unwrap();
        assert_eq!(d.id_field(), "id");
        assert_eq!(d.owner_field(), None);
        let filterable: Vec<_> = d.filterable_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(filterable, vec!["name", "price"]);
    }

    #[test]
    fn test_rejects_unknown_id_and_owner_fields() {
        let err = product().id_field("uuid").build().unwrap_err();
        assert_matches!(err, RepoError::Configuration(msg) if msg.contains("uuid"));

        let err = product().owner_field("tenant").build().unwrap_err();
        assert_matches!(err, RepoError::Configuration(msg) if msg.contains("tenant"));

        assert!(product().owner_field("user_id").build().is_ok());
    }

    #[test]
    fn test_rejects_bad_identifiers_and_duplicates() {
        let err = EntityDescriptor::builder("Bad", "bad table")
            .field(FieldDef::new("id", FieldType::Integer))
            .build()
            .unwrap_err();
        assert_matches!(err, RepoError::Configuration(_));

        let err = product()
            .field(FieldDef::new("name", FieldType::Text))
            .build()
            .unwrap_err();
        assert_matches!(err, RepoError::Configuration(msg) if msg.contains("duplicate"));
    }

    #[test]
    fn test_many_to_many_requires_join_table() {
        let err = product()
            .relation(RelationDef::new("tags", RelationKind::ManyToMany, missing, "id", "id"))
            .build()
            .unwrap_err();
        assert_matches!(err, RepoError::Configuration(msg) if msg.contains("join table"));

        let ok = product()
            .relation(
                RelationDef::new("tags", RelationKind::ManyToMany, missing, "id", "id")
                    .through("product_tags", "product_id", "tag_id"),
            )
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_create_table_sql() {
        let d = product().default_sort("price", SortDirection::Desc).build().unwrap();
        assert_eq!(
            d.create_table_sql(),
            "CREATE TABLE IF NOT EXISTS products (\n  id INTEGER PRIMARY KEY,\n  name TEXT,\n  price REAL,\n  user_id TEXT\n)"
        );
        assert_eq!(d.select_sql(), "SELECT id, name, price, user_id FROM products");
        assert_eq!(d.default_sort().unwrap().direction, SortDirection::Desc);
    }

    #[test]
    fn test_text_primary_key_is_not_null() {
        let d = EntityDescriptor::builder("Slug", "slugs")
            .field(FieldDef::new("code", FieldType::Text))
            .field(FieldDef::new("label", FieldType::Text))
            .id_field("code")
            .build()
            .unwrap();
        assert_eq!(
            d.create_table_sql(),
            "CREATE TABLE IF NOT EXISTS slugs (\n  code TEXT PRIMARY KEY NOT NULL,\n  label TEXT\n)"
        );
    }
}
