//! Generic repository
//!
//! One CRUD engine for every entity. The descriptor drives column lists,
//! conversions and predicates; entities travel as records (see
//! [`record`](super::record)) and are decoded into `T` only at the edge.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let products = db.repository::<Product>()?;
//!
//! let created = products.create(&Product::new("Phone", 999.99)).await?;
//! let renamed = products
//!     .update(created.id, Update::Patch(Patch::new().set("name", "Phone X")))
//!     .await?;
//!
//! let params = QueryParams::parse("price_gte=500&sort=price&order=desc&per_page=2");
//! let page = products.list(&products.compile(&params)).await?;
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::builder::{EntityQuery, insert_statement};
use super::compiler::QueryCompiler;
use super::descriptor::{EntityDescriptor, SortSpec};
use super::options::QueryOptions;
use super::params::QueryParams;
use super::record::{
    Record, decode_row, from_record, insert_columns, is_blank, key_value, kind_of, record_key,
    to_record, update_columns,
};
use super::relations;
use super::traits::{Entity, SortDirection, SqlValue, descriptor_of};
use crate::db::sqlite_helpers::value_to_sql;
use crate::db::{Database, Executor};
use crate::error::{RepoError, Result};

/// Replacement or partial update of one record.
#[derive(Debug, Clone)]
pub enum Update<T> {
    /// Same shape as the entity; every field is written
    Full(T),
    /// Sparse field map merged over the stored record
    Patch(Patch),
}

impl<T> From<Patch> for Update<T> {
    fn from(patch: Patch) -> Self {
        Update::Patch(patch)
    }
}

/// Sparse field map for partial updates.
///
/// Fields absent from the patch keep their stored values. A field present in
/// the patch replaces the stored value wholly, including nested JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Record);

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Patch from a JSON object; anything else is `InvalidType`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(RepoError::InvalidType(format!(
                "patch must be an object, got {}",
                kind_of(&other)
            ))),
        }
    }

    /// Patch from any serializable DTO (its serde map)
    pub fn from_serialize<S: Serialize>(value: &S) -> Result<Self> {
        to_record(value).map(Self)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_record(self) -> Record {
        self.0
    }
}

impl From<Record> for Patch {
    fn from(record: Record) -> Self {
        Self(record)
    }
}

/// Equality predicates for `find_one_by` / `find_all_by`, ANDed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicates {
    terms: Vec<(String, Value)>,
}

impl Predicates {
    pub fn new() -> Self {
        Self::default()
    }

    /// `field = value`; a null value matches `IS NULL`
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((field.into(), value.into()));
        self
    }

    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.eq(field, Value::Null)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.terms.iter().map(|(f, v)| (f.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Caller-written WHERE fragment against the entity's own table.
///
/// The fragment is trusted SQL; values are still bound. Ownership scoping and
/// other predicates are ANDed around it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawQuery {
    condition: String,
    values: Vec<SqlValue>,
    sort: Vec<SortSpec>,
    limit: Option<u64>,
}

impl RawQuery {
    pub fn new(condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            ..Default::default()
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortSpec {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One page of a list query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Rows matching the query across all pages
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.per_page == 0 {
            0
        } else {
            self.total.div_ceil(self.per_page as u64)
        }
    }

    pub fn has_next_page(&self) -> bool {
        (self.page as u64) < self.total_pages()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }

    pub(crate) fn from_parts(items: Vec<T>, total: u64, options: &QueryOptions) -> Self {
        let (page, per_page) = if options.disable_pagination() {
            (1, total.clamp(1, u32::MAX as u64) as u32)
        } else {
            (options.page(), options.per_page())
        };
        Self {
            items,
            total,
            page,
            per_page,
        }
    }
}

/// Generic repository for entity `T`.
///
/// Cheap to clone. A repository is bound to an [`Executor`]: the pool, or the
/// transaction of an enclosing [`with_transaction`](Self::with_transaction).
pub struct Repository<T: Entity> {
    exec: Executor,
    entity: Arc<EntityDescriptor>,
    relations: Vec<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            exec: self.exec.clone(),
            entity: Arc::clone(&self.entity),
            relations: self.relations.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &self.entity.name())
            .field("exec", &self.exec)
            .field("relations", &self.relations)
            .finish()
    }
}

impl<T: Entity> Repository<T> {
    /// Register `T` against the database pool.
    pub fn new(db: &Database) -> Result<Self> {
        Self::with_executor(db.executor())
    }

    /// Register `T` against an explicit executor.
    pub fn with_executor(exec: Executor) -> Result<Self> {
        let entity = descriptor_of::<T>()?;
        info!(
            entity = entity.name(),
            table = entity.table(),
            "Registered repository"
        );
        Ok(Self {
            exec,
            entity,
            relations: Vec::new(),
            _marker: PhantomData,
        })
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }

    pub fn executor(&self) -> &Executor {
        &self.exec
    }

    /// Same repository, bound to another executor
    pub(crate) fn bind(&self, exec: Executor) -> Self {
        Self {
            exec,
            ..self.clone()
        }
    }

    /// Default query options for this entity
    pub fn options(&self) -> QueryOptions {
        QueryOptions::new(Arc::clone(&self.entity))
    }

    /// Compile transport parameters with the default compiler settings
    pub fn compile(&self, params: &QueryParams) -> QueryOptions {
        QueryCompiler::default().compile(params, &self.entity)
    }

    /// A repository that also eager-loads `names` on every read.
    ///
    /// Unknown names surface as `Configuration` errors on the first read.
    pub fn with_relations(&self, names: &[&str]) -> Self {
        let mut repo = self.clone();
        for name in names {
            if !repo.relations.iter().any(|r| r == name) {
                repo.relations.push(name.to_string());
            }
        }
        repo
    }

    /// Decode bulk transport input: a JSON array of entities.
    pub fn records_from_value(value: Value) -> Result<Vec<T>> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| serde_json::from_value(item).map_err(|e| RepoError::InvalidType(e.to_string())))
                .collect(),
            other => Err(RepoError::InvalidType(format!(
                "bulk input must be an array, got {}",
                kind_of(&other)
            ))),
        }
    }

    pub(crate) fn key(&self, id: impl Into<SqlValue>) -> SqlValue {
        key_value(&self.entity, id.into())
    }

    pub(crate) fn keys<I>(&self, ids: I) -> Vec<SqlValue>
    where
        I: IntoIterator,
        I::Item: Into<SqlValue>,
    {
        ids.into_iter().map(|id| self.key(id)).collect()
    }

    // ========================================================================
    // Typed API
    // ========================================================================

    pub async fn get(&self, id: impl Into<SqlValue>) -> Result<T> {
        from_record(self.get_record(&self.key(id), &[]).await?)
    }

    pub async fn get_with_relations(&self, id: impl Into<SqlValue>, relations: &[&str]) -> Result<T> {
        from_record(self.get_record(&self.key(id), &names(relations)).await?)
    }

    /// Persist `entity` as-is. A null or blank id is left for the store to assign.
    pub async fn create(&self, entity: &T) -> Result<T> {
        from_record(self.insert_record(to_record(entity)?).await?)
    }

    pub async fn update(&self, id: impl Into<SqlValue>, update: Update<T>) -> Result<T> {
        let (changes, strict) = match update {
            Update::Full(entity) => (to_record(&entity)?, false),
            Update::Patch(patch) => (patch.into_record(), true),
        };
        from_record(self.update_record(&self.key(id), changes, strict).await?)
    }

    pub async fn delete(&self, id: impl Into<SqlValue>) -> Result<()> {
        self.delete_record(&self.key(id)).await
    }

    pub async fn count(&self, options: &QueryOptions) -> Result<u64> {
        let query = EntityQuery::from_options(Arc::clone(&self.entity), &options.for_count())?;
        self.exec.count(&query.build_count()).await
    }

    pub async fn list(&self, options: &QueryOptions) -> Result<Page<T>> {
        self.list_with_relations(options, &[]).await
    }

    pub async fn list_with_relations(&self, options: &QueryOptions, relations: &[&str]) -> Result<Page<T>> {
        let (records, total) = self.list_records(options, &names(relations)).await?;
        let items = records.into_iter().map(from_record).collect::<Result<Vec<T>>>()?;
        Ok(Page::from_parts(items, total, options))
    }

    /// Insert every entity or none.
    pub async fn create_many(&self, entities: &[T]) -> Result<Vec<T>> {
        let records = entities.iter().map(to_record).collect::<Result<Vec<_>>>()?;
        self.create_many_records(records)
            .await?
            .into_iter()
            .map(from_record)
            .collect()
    }

    /// Apply `patch` to every id or to none; a missing id fails the whole call.
    pub async fn update_many<I>(&self, ids: I, patch: Patch) -> Result<u64>
    where
        I: IntoIterator,
        I::Item: Into<SqlValue>,
    {
        self.update_many_records(self.keys(ids), patch.into_record()).await
    }

    /// Delete every id or none; a missing id fails the whole call.
    pub async fn delete_many<I>(&self, ids: I) -> Result<u64>
    where
        I: IntoIterator,
        I::Item: Into<SqlValue>,
    {
        self.delete_many_records(self.keys(ids)).await
    }

    pub async fn find_one_by(&self, predicates: &Predicates) -> Result<T> {
        self.find_records(predicates, Some(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::not_found_by_predicate(self.entity.name()))
            .and_then(from_record)
    }

    pub async fn find_all_by(&self, predicates: &Predicates) -> Result<Vec<T>> {
        self.find_records(predicates, None)
            .await?
            .into_iter()
            .map(from_record)
            .collect()
    }

    /// Escape hatch: entities matching a caller-written WHERE fragment.
    pub async fn query(&self, raw: &RawQuery) -> Result<Vec<T>> {
        self.raw_records(raw, &Predicates::new())
            .await?
            .into_iter()
            .map(from_record)
            .collect()
    }

    /// Run `f` with a repository bound to one transaction.
    ///
    /// Every write issued through that repository commits when `f` returns
    /// `Ok` and rolls back when it returns `Err`. Inside another transaction,
    /// `f` runs in a savepoint of it.
    pub async fn with_transaction<F, Fut, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(Repository<T>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.exec.atomic(|exec| f(self.bind(exec))).await
    }

    // ========================================================================
    // Record-level operations (shared with the ownership decorator)
    // ========================================================================

    pub(crate) async fn fetch_record(&self, id: &SqlValue) -> Result<Option<Record>> {
        let statement = EntityQuery::new(Arc::clone(&self.entity))
            .where_eq(self.entity.id_field(), id.clone())
            .limit(1)
            .build_select();
        self.exec
            .fetch_optional(&statement)
            .await?
            .map(|row| decode_row(&self.entity, &row))
            .transpose()
    }

    pub(crate) async fn get_record(&self, id: &SqlValue, relations: &[String]) -> Result<Record> {
        let record = self
            .fetch_record(id)
            .await?
            .ok_or_else(|| RepoError::not_found(self.entity.name(), id))?;
        self.attach_one(record, relations).await
    }

    pub(crate) async fn insert_record(&self, record: Record) -> Result<Record> {
        let statement = insert_statement(&self.entity, insert_columns(&self.entity, &record)?);
        let row = self
            .exec
            .fetch_optional(&statement)
            .await?
            .ok_or_else(|| RepoError::not_found_by_predicate(self.entity.name()))?;
        let created = decode_row(&self.entity, &row)?;
        debug!(entity = self.entity.name(), "Created record");
        self.attach_one(created, &[]).await
    }

    /// Fetch, merge `changes` over the stored record, write back. Runs as one
    /// unit of work. With `strict`, keys that are neither fields nor relations
    /// are rejected.
    pub(crate) async fn update_record(&self, id: &SqlValue, changes: Record, strict: bool) -> Result<Record> {
        let entity = Arc::clone(&self.entity);
        let updated = self
            .exec
            .atomic(|exec| async move {
                let repo = self.bind(exec);
                let existing = repo
                    .fetch_record(id)
                    .await?
                    .ok_or_else(|| RepoError::not_found(entity.name(), id))?;
                let merged = merge(&entity, existing, changes, strict)?;
                let columns = update_columns(&entity, &merged)?;
                if columns.is_empty() {
                    return Ok(merged);
                }

                let statement = EntityQuery::new(Arc::clone(&entity))
                    .where_eq(entity.id_field(), id.clone())
                    .build_update(columns);
                let row = repo
                    .exec
                    .fetch_optional(&statement)
                    .await?
                    .ok_or_else(|| RepoError::not_found(entity.name(), id))?;
                decode_row(&entity, &row)
            })
            .await?;
        self.attach_one(updated, &[]).await
    }

    pub(crate) async fn delete_record(&self, id: &SqlValue) -> Result<()> {
        let statement = EntityQuery::new(Arc::clone(&self.entity))
            .where_eq(self.entity.id_field(), id.clone())
            .build_delete();
        match self.exec.execute(&statement).await? {
            0 => Err(RepoError::not_found(self.entity.name(), id)),
            _ => Ok(()),
        }
    }

    pub(crate) async fn list_records(
        &self,
        options: &QueryOptions,
        relations: &[String],
    ) -> Result<(Vec<Record>, u64)> {
        let query = EntityQuery::from_options(Arc::clone(&self.entity), options)?;
        let total = self.exec.count(&query.build_count()).await?;
        let mut records = self.decode_all(&query).await?;
        self.attach(&mut records, relations).await?;
        Ok((records, total))
    }

    pub(crate) async fn create_many_records(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        let count = records.len();
        let created = self
            .exec
            .atomic(|exec| async move {
                let repo = self.bind(exec);
                let mut created = Vec::with_capacity(records.len());
                for record in records {
                    created.push(repo.insert_record(record).await?);
                }
                Ok(created)
            })
            .await?;
        info!(entity = self.entity.name(), count, "Created records");
        Ok(created)
    }

    pub(crate) async fn update_many_records(&self, ids: Vec<SqlValue>, patch: Record) -> Result<u64> {
        let columns = update_columns(&self.entity, &merge(&self.entity, Record::new(), patch, true)?)?;
        let affected = self
            .exec
            .atomic(|exec| async move {
                let repo = self.bind(exec);
                let found = repo.ensure_exist(&ids).await?;
                if columns.is_empty() || found == 0 {
                    return Ok(found);
                }
                let statement = EntityQuery::new(Arc::clone(&repo.entity))
                    .where_in(repo.entity.id_field(), ids)
                    .build_update(columns);
                Ok(repo.exec.fetch_all(&statement).await?.len() as u64)
            })
            .await?;
        info!(entity = self.entity.name(), affected, "Updated records");
        Ok(affected)
    }

    pub(crate) async fn delete_many_records(&self, ids: Vec<SqlValue>) -> Result<u64> {
        let affected = self
            .exec
            .atomic(|exec| async move {
                let repo = self.bind(exec);
                if repo.ensure_exist(&ids).await? == 0 {
                    return Ok(0);
                }
                let statement = EntityQuery::new(Arc::clone(&repo.entity))
                    .where_in(repo.entity.id_field(), ids)
                    .build_delete();
                repo.exec.execute(&statement).await
            })
            .await?;
        info!(entity = self.entity.name(), affected, "Deleted records");
        Ok(affected)
    }

    pub(crate) async fn find_records(&self, predicates: &Predicates, limit: Option<u64>) -> Result<Vec<Record>> {
        let mut query = self.predicate_query(predicates)?.order_by(&self.natural_order());
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        let mut records = self.decode_all(&query).await?;
        self.attach(&mut records, &[]).await?;
        Ok(records)
    }

    pub(crate) async fn raw_records(&self, raw: &RawQuery, scope: &Predicates) -> Result<Vec<Record>> {
        if let Some(spec) = raw.sort.iter().find(|s| self.entity.field(&s.field).is_none()) {
            return Err(RepoError::UnknownField(format!("{}.{}", self.entity.name(), spec.field)));
        }

        let mut query = self
            .predicate_query(scope)?
            .where_clause(&raw.condition, raw.values.clone())
            .order_by_declared(&raw.sort);
        if let Some(limit) = raw.limit {
            query = query.limit(limit);
        }
        let mut records = self.decode_all(&query).await?;
        self.attach(&mut records, &[]).await?;
        Ok(records)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Distinct count of `ids`; `NotFound` for the first id with no row
    async fn ensure_exist(&self, ids: &[SqlValue]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let query = EntityQuery::new(Arc::clone(&self.entity)).where_in(self.entity.id_field(), ids.to_vec());
        let found: std::collections::HashSet<String> = self
            .decode_all(&query)
            .await?
            .iter()
            .map(|record| record_key(&self.entity, record).map(|v| v.as_text()))
            .collect::<Result<_>>()?;

        if let Some(missing) = ids.iter().find(|id| !found.contains(&id.as_text())) {
            return Err(RepoError::not_found(self.entity.name(), missing));
        }
        Ok(found.len() as u64)
    }

    fn predicate_query(&self, predicates: &Predicates) -> Result<EntityQuery> {
        let mut query = EntityQuery::new(Arc::clone(&self.entity));
        for (name, value) in predicates.iter() {
            let field = self
                .entity
                .field(name)
                .ok_or_else(|| RepoError::UnknownField(format!("{}.{}", self.entity.name(), name)))?;
            query = query.where_eq(&field.name, value_to_sql(field, value)?);
        }
        Ok(query)
    }

    fn natural_order(&self) -> Vec<SortSpec> {
        vec![self.entity.default_sort().cloned().unwrap_or_else(|| SortSpec {
            field: self.entity.id_field().to_string(),
            direction: SortDirection::Asc,
        })]
    }

    async fn decode_all(&self, query: &EntityQuery) -> Result<Vec<Record>> {
        self.exec
            .fetch_all(&query.build_select())
            .await?
            .iter()
            .map(|row| decode_row(&self.entity, row))
            .collect()
    }

    /// Attach default, configured and `extra` relations
    async fn attach(&self, records: &mut [Record], extra: &[String]) -> Result<()> {
        let mut requested = self.relations.clone();
        requested.extend(extra.iter().cloned());
        let names = relations::resolve_names(&self.entity, &requested)?;
        if names.is_empty() {
            return Ok(());
        }
        relations::load(&self.exec, &self.entity, records, &names).await
    }

    async fn attach_one(&self, record: Record, extra: &[String]) -> Result<Record> {
        let mut records = [record];
        self.attach(&mut records, extra).await?;
        let [record] = records;
        Ok(record)
    }
}

/// Merge `changes` over `existing` field by field.
///
/// The id always comes from the stored record and a blank owner value never
/// replaces the stored owner.
fn merge(entity: &EntityDescriptor, mut existing: Record, changes: Record, strict: bool) -> Result<Record> {
    for (key, value) in changes {
        if entity.field(&key).is_none() {
            if strict && entity.relation(&key).is_none() {
                return Err(RepoError::UnknownField(format!("{}.{}", entity.name(), key)));
            }
            continue;
        }
        if key == entity.id_field() {
            continue;
        }
        if entity.owner_field() == Some(key.as_str()) && is_blank(&value) {
            debug!(entity = entity.name(), field = %key, "Discarding blank owner value");
            continue;
        }
        existing.insert(key, value);
    }
    Ok(existing)
}

fn names(relations: &[&str]) -> Vec<String> {
    relations.iter().map(|r| r.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::descriptor::{FieldDef, FieldType};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn note() -> EntityDescriptor {
        EntityDescriptor::builder("Note", "notes")
            .field(FieldDef::new("id", FieldType::Integer))
            .field(FieldDef::new("title", FieldType::Text))
            .field(FieldDef::new("meta", FieldType::Json))
            .field(FieldDef::new("user_id", FieldType::Text))
            .owner_field("user_id")
            .build()
            .unwrap()
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_merge_keeps_siblings_and_replaces_nested_wholly() {
        let existing = record(json!({"id": 1, "title": "A", "meta": {"a": 1, "b": 2}, "user_id": "u1"}));
        let merged = merge(&note(), existing, record(json!({"meta": {"c": 3}})), true).unwrap();
        assert_eq!(
            Value::Object(merged),
            json!({"id": 1, "title": "A", "meta": {"c": 3}, "user_id": "u1"})
        );
    }

    #[test]
    fn test_merge_ignores_id_and_blank_owner() {
        let existing = record(json!({"id": 1, "title": "A", "meta": null, "user_id": "u1"}));
        let changes = record(json!({"id": 99, "title": "B", "user_id": "  "}));
        let merged = merge(&note(), existing, changes, true).unwrap();
        assert_eq!(merged["id"], json!(1));
        assert_eq!(merged["title"], json!("B"));
        assert_eq!(merged["user_id"], json!("u1"));

        let existing = record(json!({"id": 1, "user_id": "u1"}));
        let merged = merge(&note(), existing, record(json!({"user_id": null})), false).unwrap();
        assert_eq!(merged["user_id"], json!("u1"));
    }

    #[test]
    fn test_strict_merge_rejects_unknown_keys() {
        let err = merge(&note(), Record::new(), record(json!({"colour": "red"})), true).unwrap_err();
        assert_matches!(err, RepoError::UnknownField(f) if f == "Note.colour");
        assert!(merge(&note(), Record::new(), record(json!({"colour": "red"})), false).is_ok());
    }

    #[test]
    fn test_patch_from_value_requires_object() {
        assert!(Patch::from_value(json!({"title": "x"})).is_ok());
        assert_matches!(Patch::from_value(json!(["x"])), Err(RepoError::InvalidType(_)));
    }

    #[test]
    fn test_page_helpers() {
        let page = Page { items: vec![1, 2], total: 5, page: 2, per_page: 2 };
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next_page());
        let last = Page { page: 3, ..page.map(|i| i * 10) };
        assert!(!last.has_next_page());
        assert_eq!(last.items, vec![10, 20]);
    }
}
