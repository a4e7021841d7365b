//! Ownership-scoped repositories
//!
//! `OwnedRepository` wraps a [`Repository`] and routes every operation through
//! the caller's owner identity:
//!
//! - writes stamp the owner onto the owner field
//! - reads and writes by id verify the stored owner first
//!   (`NotFound` if the row is missing, `OwnerMismatch` if it belongs to someone else)
//! - collection reads get an owner equality filter, so totals stay correct
//! - bulk writes by id verify every id before anything is modified
//!
//! The owner is resolved per call from an explicit context argument; the
//! decorator itself holds no per-request state and can be shared freely.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::descriptor::{EntityDescriptor, FieldDef, FieldType};
use super::filters::Filter;
use super::options::QueryOptions;
use super::record::{Record, from_record, to_record};
use super::repository::{Page, Patch, Predicates, RawQuery, Repository, Update};
use super::traits::{Entity, SqlValue};
use crate::db::sqlite_helpers::{sql_to_value, value_to_sql};
use crate::error::{RepoError, Result};

/// Identity of the principal owning a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OwnerId {
    Int(i64),
    Text(String),
}

impl OwnerId {
    fn is_blank(&self) -> bool {
        matches!(self, OwnerId::Text(s) if s.trim().is_empty())
    }

    /// Storage form for an owner field of type `field`
    fn to_sql(&self, field: &FieldDef) -> Result<SqlValue> {
        let invalid = || {
            RepoError::InvalidType(format!(
                "owner '{}' does not fit owner field '{}' ({:?})",
                self, field.name, field.field_type
            ))
        };
        match (field.field_type, self) {
            (FieldType::Integer, OwnerId::Int(i)) => Ok(SqlValue::Int(*i)),
            (FieldType::Integer, OwnerId::Text(s)) => {
                s.trim().parse().map(SqlValue::Int).map_err(|_| invalid())
            }
            (FieldType::Real, OwnerId::Int(i)) => Ok(SqlValue::Float(*i as f64)),
            (FieldType::Real, OwnerId::Text(s)) => {
                s.trim().parse().map(SqlValue::Float).map_err(|_| invalid())
            }
            (FieldType::Text, OwnerId::Int(i)) => Ok(SqlValue::String(i.to_string())),
            (FieldType::Text, OwnerId::Text(s)) => Ok(SqlValue::String(s.clone())),
            (FieldType::Boolean | FieldType::Json, _) => Err(invalid()),
        }
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerId::Int(i) => write!(f, "{i}"),
            OwnerId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        OwnerId::Text(value.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        OwnerId::Text(value)
    }
}

impl From<i64> for OwnerId {
    fn from(value: i64) -> Self {
        OwnerId::Int(value)
    }
}

impl From<uuid::Uuid> for OwnerId {
    fn from(value: uuid::Uuid) -> Self {
        OwnerId::Text(value.to_string())
    }
}

/// Resolves the owner identity from a request-scoped context.
///
/// `Ok(None)` means "no owner in this context"; errors propagate unchanged.
pub trait OwnerResolver<C: ?Sized>: Send + Sync {
    fn resolve_owner(&self, ctx: &C) -> Result<Option<OwnerId>>;
}

impl<C: ?Sized, F> OwnerResolver<C> for F
where
    F: Fn(&C) -> Result<Option<OwnerId>> + Send + Sync,
{
    fn resolve_owner(&self, ctx: &C) -> Result<Option<OwnerId>> {
        self(ctx)
    }
}

/// Minimal request context carrying an optional owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerContext {
    owner: Option<OwnerId>,
}

impl OwnerContext {
    pub fn new(owner: impl Into<OwnerId>) -> Self {
        Self {
            owner: Some(owner.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> Option<&OwnerId> {
        self.owner.as_ref()
    }
}

/// Resolver reading the owner straight from an [`OwnerContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextOwner;

impl OwnerResolver<OwnerContext> for ContextOwner {
    fn resolve_owner(&self, ctx: &OwnerContext) -> Result<Option<OwnerId>> {
        Ok(ctx.owner().cloned())
    }
}

/// Per-entity ownership enforcement.
#[derive(Debug, Clone)]
pub struct OwnershipSettings {
    /// When false, every call goes to the inner repository unmodified
    pub enabled: bool,
    /// Owner used when the context has none
    pub default_owner: Option<OwnerId>,
}

impl Default for OwnershipSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_owner: None,
        }
    }
}

/// A [`Repository`] scoped to the owner resolved from each call's context.
pub struct OwnedRepository<T: Entity, C: ?Sized = OwnerContext, R = ContextOwner> {
    inner: Repository<T>,
    resolver: Arc<R>,
    settings: OwnershipSettings,
    owner: FieldDef,
    _ctx: PhantomData<fn(&C)>,
}

impl<T: Entity, C: ?Sized, R> Clone for OwnedRepository<T, C, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            resolver: Arc::clone(&self.resolver),
            settings: self.settings.clone(),
            owner: self.owner.clone(),
            _ctx: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    /// Wrap this repository in ownership scoping.
    pub fn owned<C: ?Sized, R: OwnerResolver<C>>(self, resolver: R) -> Result<OwnedRepository<T, C, R>> {
        OwnedRepository::new(self, resolver)
    }
}

impl<T: Entity, C: ?Sized, R: OwnerResolver<C>> OwnedRepository<T, C, R> {
    /// Scope `inner` by its entity's owner field.
    ///
    /// Fails with `Configuration` when the entity declares no owner field, or
    /// one whose type cannot hold an owner identity.
    pub fn new(inner: Repository<T>, resolver: R) -> Result<Self> {
        let entity = inner.descriptor();
        let owner = entity
            .owner_field()
            .and_then(|name| entity.field(name))
            .cloned()
            .ok_or_else(|| {
                RepoError::Configuration(format!("{}: no owner field declared", entity.name()))
            })?;
        if matches!(owner.field_type, FieldType::Boolean | FieldType::Json) {
            return Err(RepoError::Configuration(format!(
                "{}: owner field '{}' must be text or numeric",
                entity.name(),
                owner.name
            )));
        }

        Ok(Self {
            inner,
            resolver: Arc::new(resolver),
            settings: OwnershipSettings::default(),
            owner,
            _ctx: PhantomData,
        })
    }

    pub fn with_settings(mut self, settings: OwnershipSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &OwnershipSettings {
        &self.settings
    }

    /// The unscoped repository
    pub fn inner(&self) -> &Repository<T> {
        &self.inner
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        self.inner.descriptor()
    }

    pub fn with_relations(&self, names: &[&str]) -> Self {
        Self {
            inner: self.inner.with_relations(names),
            ..self.clone()
        }
    }

    fn bind(&self, inner: Repository<T>) -> Self {
        Self {
            inner,
            ..self.clone()
        }
    }

    /// Owner in storage form, or `None` when enforcement is off
    fn scope(&self, ctx: &C) -> Result<Option<SqlValue>> {
        if !self.settings.enabled {
            return Ok(None);
        }
        let owner = match self.resolver.resolve_owner(ctx)? {
            Some(owner) if !owner.is_blank() => owner,
            _ => self
                .settings
                .default_owner
                .clone()
                .ok_or(RepoError::OwnerIdNotFound)?,
        };
        owner.to_sql(&self.owner).map(Some)
    }

    fn verify(&self, record: &Record, owner: &SqlValue, id: &SqlValue) -> Result<()> {
        let stored = match record.get(&self.owner.name) {
            Some(value) => value_to_sql(&self.owner, value)?,
            None => SqlValue::Null,
        };
        if !stored.is_null() && stored.as_text() == owner.as_text() {
            return Ok(());
        }
        warn!(
            entity = self.inner.descriptor().name(),
            id = %id,
            "Denied access to record of another owner"
        );
        Err(RepoError::owner_mismatch(self.inner.descriptor().name(), id))
    }

    /// Fetch by id and check the owner; `NotFound` / `OwnerMismatch` otherwise
    async fn fetch_owned(&self, repo: &Repository<T>, id: &SqlValue, owner: &SqlValue) -> Result<Record> {
        let record = repo
            .fetch_record(id)
            .await?
            .ok_or_else(|| RepoError::not_found(repo.descriptor().name(), id))?;
        self.verify(&record, owner, id)?;
        Ok(record)
    }

    fn stamp(&self, record: &mut Record, owner: &SqlValue) {
        record.insert(self.owner.name.clone(), sql_to_value(&self.owner, owner));
    }

    fn owner_filter(&self, options: &QueryOptions, owner: &SqlValue) -> QueryOptions {
        options
            .clone()
            .with_filter(Filter::eq(self.owner.name.clone(), owner.as_text()))
    }

    fn owner_predicates(&self, predicates: &Predicates, owner: &SqlValue) -> Predicates {
        predicates
            .clone()
            .eq(self.owner.name.clone(), sql_to_value(&self.owner, owner))
    }

    // ========================================================================
    // Reads by id
    // ========================================================================

    pub async fn get(&self, ctx: &C, id: impl Into<SqlValue>) -> Result<T> {
        self.get_with_relations(ctx, id, &[]).await
    }

    pub async fn get_with_relations(&self, ctx: &C, id: impl Into<SqlValue>, relations: &[&str]) -> Result<T> {
        let Some(owner) = self.scope(ctx)? else {
            return self.inner.get_with_relations(id, relations).await;
        };
        let id = self.inner.key(id);
        let names: Vec<String> = relations.iter().map(|r| r.to_string()).collect();
        let record = self.inner.get_record(&id, &names).await?;
        self.verify(&record, &owner, &id)?;
        from_record(record)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub async fn create(&self, ctx: &C, entity: &T) -> Result<T> {
        let Some(owner) = self.scope(ctx)? else {
            return self.inner.create(entity).await;
        };
        let mut record = to_record(entity)?;
        self.stamp(&mut record, &owner);
        from_record(self.inner.insert_record(record).await?)
    }

    pub async fn create_many(&self, ctx: &C, entities: &[T]) -> Result<Vec<T>> {
        let Some(owner) = self.scope(ctx)? else {
            return self.inner.create_many(entities).await;
        };
        let mut records = Vec::with_capacity(entities.len());
        for entity in entities {
            let mut record = to_record(entity)?;
            self.stamp(&mut record, &owner);
            records.push(record);
        }
        self.inner
            .create_many_records(records)
            .await?
            .into_iter()
            .map(from_record)
            .collect()
    }

    pub async fn update(&self, ctx: &C, id: impl Into<SqlValue>, update: Update<T>) -> Result<T> {
        let Some(owner) = self.scope(ctx)? else {
            return self.inner.update(id, update).await;
        };
        let id = self.inner.key(id);
        let (mut changes, strict) = match update {
            Update::Full(entity) => (to_record(&entity)?, false),
            Update::Patch(patch) => (patch.into_record(), true),
        };
        self.stamp(&mut changes, &owner);

        let record = self
            .inner
            .executor()
            .atomic(|exec| async move {
                let repo = self.inner.bind(exec);
                self.fetch_owned(&repo, &id, &owner).await?;
                repo.update_record(&id, changes, strict).await
            })
            .await?;
        from_record(record)
    }

    pub async fn delete(&self, ctx: &C, id: impl Into<SqlValue>) -> Result<()> {
        let Some(owner) = self.scope(ctx)? else {
            return self.inner.delete(id).await;
        };
        let id = self.inner.key(id);
        self.inner
            .executor()
            .atomic(|exec| async move {
                let repo = self.inner.bind(exec);
                self.fetch_owned(&repo, &id, &owner).await?;
                repo.delete_record(&id).await
            })
            .await
    }

    /// Verifies every id before patching any; one foreign or missing id fails the call.
    pub async fn update_many<I>(&self, ctx: &C, ids: I, patch: Patch) -> Result<u64>
    where
        I: IntoIterator,
        I::Item: Into<SqlValue>,
    {
        let Some(owner) = self.scope(ctx)? else {
            return self.inner.update_many(ids, patch).await;
        };
        let ids = self.inner.keys(ids);
        let mut patch = patch.into_record();
        if patch.contains_key(&self.owner.name) {
            self.stamp(&mut patch, &owner);
        }

        self.inner
            .executor()
            .atomic(|exec| async move {
                let repo = self.inner.bind(exec);
                for id in &ids {
                    self.fetch_owned(&repo, id, &owner).await?;
                }
                repo.update_many_records(ids, patch).await
            })
            .await
    }

    /// Verifies every id before deleting any; one foreign or missing id fails the call.
    pub async fn delete_many<I>(&self, ctx: &C, ids: I) -> Result<u64>
    where
        I: IntoIterator,
        I::Item: Into<SqlValue>,
    {
        let Some(owner) = self.scope(ctx)? else {
            return self.inner.delete_many(ids).await;
        };
        let ids = self.inner.keys(ids);

        self.inner
            .executor()
            .atomic(|exec| async move {
                let repo = self.inner.bind(exec);
                for id in &ids {
                    self.fetch_owned(&repo, id, &owner).await?;
                }
                repo.delete_many_records(ids).await
            })
            .await
    }

    // ========================================================================
    // Collection reads
    // ========================================================================

    pub async fn count(&self, ctx: &C, options: &QueryOptions) -> Result<u64> {
        match self.scope(ctx)? {
            Some(owner) => self.inner.count(&self.owner_filter(options, &owner)).await,
            None => self.inner.count(options).await,
        }
    }

    pub async fn list(&self, ctx: &C, options: &QueryOptions) -> Result<Page<T>> {
        self.list_with_relations(ctx, options, &[]).await
    }

    pub async fn list_with_relations(
        &self,
        ctx: &C,
        options: &QueryOptions,
        relations: &[&str],
    ) -> Result<Page<T>> {
        match self.scope(ctx)? {
            Some(owner) => {
                self.inner
                    .list_with_relations(&self.owner_filter(options, &owner), relations)
                    .await
            }
            None => self.inner.list_with_relations(options, relations).await,
        }
    }

    pub async fn find_one_by(&self, ctx: &C, predicates: &Predicates) -> Result<T> {
        match self.scope(ctx)? {
            Some(owner) => {
                self.inner
                    .find_one_by(&self.owner_predicates(predicates, &owner))
                    .await
            }
            None => self.inner.find_one_by(predicates).await,
        }
    }

    pub async fn find_all_by(&self, ctx: &C, predicates: &Predicates) -> Result<Vec<T>> {
        match self.scope(ctx)? {
            Some(owner) => {
                self.inner
                    .find_all_by(&self.owner_predicates(predicates, &owner))
                    .await
            }
            None => self.inner.find_all_by(predicates).await,
        }
    }

    pub async fn query(&self, ctx: &C, raw: &RawQuery) -> Result<Vec<T>> {
        let scope = match self.scope(ctx)? {
            Some(owner) => self.owner_predicates(&Predicates::new(), &owner),
            None => Predicates::new(),
        };
        self.inner
            .raw_records(raw, &scope)
            .await?
            .into_iter()
            .map(from_record)
            .collect()
    }

    /// Run `f` with an owned repository bound to one transaction.
    pub async fn with_transaction<F, Fut, Out>(&self, f: F) -> Result<Out>
    where
        F: FnOnce(OwnedRepository<T, C, R>) -> Fut,
        Fut: Future<Output = Result<Out>>,
    {
        self.inner
            .executor()
            .atomic(|exec| f(self.bind(self.inner.bind(exec))))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_owner_id_conversions() {
        let text = FieldDef::new("user_id", FieldType::Text);
        let int = FieldDef::new("user_id", FieldType::Integer);

        assert_eq!(OwnerId::from("u1").to_sql(&text).unwrap(), SqlValue::from("u1"));
        assert_eq!(OwnerId::from(7).to_sql(&text).unwrap(), SqlValue::from("7"));
        assert_eq!(OwnerId::from("42").to_sql(&int).unwrap(), SqlValue::Int(42));
        assert_matches!(OwnerId::from("abc").to_sql(&int), Err(RepoError::InvalidType(_)));
    }

    #[test]
    fn test_owner_id_serde_is_untagged() {
        let ids: Vec<OwnerId> = serde_json::from_str(r#"["u1", 5]"#).unwrap();
        assert_eq!(ids, vec![OwnerId::from("u1"), OwnerId::from(5)]);
    }

    #[test]
    fn test_closure_and_context_resolvers() {
        let ctx = OwnerContext::new("u1");
        assert_eq!(ContextOwner.resolve_owner(&ctx).unwrap(), Some(OwnerId::from("u1")));
        assert_eq!(ContextOwner.resolve_owner(&OwnerContext::anonymous()).unwrap(), None);

        let header = |h: &str| -> Result<Option<OwnerId>> {
            Ok(h.strip_prefix("user:").map(OwnerId::from))
        };
        assert_eq!(header.resolve_owner("user:9").unwrap(), Some(OwnerId::from("9")));
    }
}
