//! SQL query builder for repository queries
//!
//! Applies compiled [`QueryOptions`] to an entity's table and produces the
//! statements the repository executes. The count and result statements are
//! built from the same WHERE clauses and bound values, so a page and its
//! `total` always agree. Values are always bound; identifiers come from the
//! validated descriptor only.
//!
//! Case-insensitive matching (`q` and the `contains`/`startswith`/`endswith`
//! families) uses SQLite `LIKE`, which folds ASCII letters only: `PHO` finds
//! "Phone", but `émile` does not find "Émile". SQLite's `lower()`/`upper()`
//! have the same limit, so non-ASCII text matches with its exact case.

use std::sync::Arc;

use sqlx::Sqlite;
use sqlx::sqlite::SqliteArguments;

use super::descriptor::{EntityDescriptor, FieldDef, FieldType, SortSpec};
use super::filters::{Filter, FilterOperator, FilterValue};
use super::options::QueryOptions;
use super::traits::{SortDirection, SqlValue};
use crate::error::{RepoError, Result};

/// A parameterized SQL statement with its bound values, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            values: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Build the sqlx query with every value bound
    pub(crate) fn query(&self) -> sqlx::query::Query<'_, Sqlite, SqliteArguments<'_>> {
        let mut query = sqlx::query(&self.sql);
        for value in &self.values {
            query = value.bind_to_query(query);
        }
        query
    }
}

/// A query against one entity's table.
///
/// Collects WHERE clauses, ORDER BY terms and pagination, then renders
/// SELECT / COUNT / UPDATE / DELETE statements that share the same predicates.
#[derive(Debug, Clone)]
pub struct EntityQuery {
    entity: Arc<EntityDescriptor>,
    where_clauses: Vec<String>,
    values: Vec<SqlValue>,
    order_clauses: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl EntityQuery {
    pub fn new(entity: Arc<EntityDescriptor>) -> Self {
        Self {
            entity,
            where_clauses: Vec::new(),
            values: Vec::new(),
            order_clauses: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Query for `options`: search, filters, sort and (unless disabled) pagination.
    pub fn from_options(entity: Arc<EntityDescriptor>, options: &QueryOptions) -> Result<Self> {
        if options.entity().table() != entity.table() {
            return Err(RepoError::Configuration(format!(
                "query options for '{}' used with '{}'",
                options.entity().name(),
                entity.name()
            )));
        }

        let mut query = Self::new(entity).search(options.search());
        for filter in options.filters() {
            query = query.filter(filter);
        }
        query = query.order_by(options.sort());
        if !options.disable_pagination() {
            query = query.paginate(options.limit(), options.offset());
        }
        Ok(query)
    }

    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }

    /// Free-text search: an OR group of case-insensitive substring matches
    /// across every searchable field. Blank terms and entities without
    /// searchable fields leave the query unchanged.
    pub fn search(mut self, term: &str) -> Self {
        let term = term.trim();
        if term.is_empty() {
            return self;
        }

        let pattern = format!("%{}%", escape_like(term));
        let mut group = Vec::new();
        for field in self.entity.searchable_fields() {
            group.push(format!("{} LIKE ? ESCAPE '\\'", field.name));
            self.values.push(SqlValue::String(pattern.clone()));
        }

        if !group.is_empty() {
            self.where_clauses.push(format!("({})", group.join(" OR ")));
        }
        self
    }

    /// Apply one filter. Filters on undeclared fields and values that cannot
    /// be coerced to the field's type are skipped.
    pub fn filter(mut self, filter: &Filter) -> Self {
        let Some(field) = self.entity.field(filter.field()).cloned() else {
            tracing::warn!(
                entity = self.entity.name(),
                field = filter.field(),
                "Skipping filter on undeclared field"
            );
            return self;
        };

        match predicate(&field, filter) {
            Some((clause, values)) => {
                self.where_clauses.push(clause);
                self.values.extend(values);
            }
            None => tracing::warn!(
                field = filter.field(),
                operator = %filter.operator(),
                "Skipping filter whose value does not fit the field"
            ),
        }
        self
    }

    /// Add a raw WHERE condition with its bound values.
    ///
    /// The condition is wrapped in parentheses so it composes with AND.
    pub fn where_clause(mut self, condition: impl AsRef<str>, values: Vec<SqlValue>) -> Self {
        let condition = condition.as_ref().trim();
        if !condition.is_empty() {
            self.where_clauses.push(format!("({condition})"));
            self.values.extend(values);
        }
        self
    }

    /// Equality on a declared column; `Null` becomes `IS NULL`.
    pub fn where_eq(mut self, column: &str, value: SqlValue) -> Self {
        if value.is_null() {
            self.where_clauses.push(format!("{column} IS NULL"));
        } else {
            self.where_clauses.push(format!("{column} = ?"));
            self.values.push(value);
        }
        self
    }

    /// Membership on a declared column. An empty list matches nothing.
    pub fn where_in(mut self, column: &str, values: Vec<SqlValue>) -> Self {
        if values.is_empty() {
            self.where_clauses.push("0 = 1".to_string());
        } else {
            self.where_clauses
                .push(format!("{column} IN ({})", placeholders(values.len())));
            self.values.extend(values);
        }
        self
    }

    /// Order by `sort` in the given order, then by id ascending as a tiebreaker
    /// (or by id alone when `sort` is empty).
    ///
    /// Only sortable fields and the descriptor's default sort field are used.
    pub fn order_by(self, sort: &[SortSpec]) -> Self {
        self.order_with(sort, true)
    }

    /// Like [`order_by`](Self::order_by), but accepts any declared column.
    pub(crate) fn order_by_declared(self, sort: &[SortSpec]) -> Self {
        self.order_with(sort, false)
    }

    fn order_with(mut self, sort: &[SortSpec], sortable_only: bool) -> Self {
        let default_field = self.entity.default_sort().map(|s| s.field.as_str());
        for spec in sort {
            let allowed = if sortable_only {
                self.entity.is_sortable(&spec.field)
                    || default_field == Some(spec.field.as_str())
                    || spec.field == self.entity.id_field()
            } else {
                self.entity.field(&spec.field).is_some()
            };
            if !allowed {
                tracing::warn!(field = %spec.field, "Ignoring sort on non-sortable field");
                continue;
            }
            let prefix = format!("{} ", spec.field);
            if !self.order_clauses.iter().any(|c| c.starts_with(&prefix)) {
                self.order_clauses
                    .push(format!("{}{}", prefix, spec.direction.to_sql()));
            }
        }

        let id = format!("{} ", self.entity.id_field());
        if !self.order_clauses.iter().any(|c| c.starts_with(&id)) {
            self.order_clauses
                .push(format!("{}{}", id, SortDirection::Asc.to_sql()));
        }
        self
    }

    pub fn paginate(mut self, limit: u64, offset: u64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Set limit directly.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    fn where_sql(&self) -> String {
        if self.where_clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.where_clauses.join(" AND "))
        }
    }

    /// The result statement: predicates, ordering and pagination.
    pub fn build_select(&self) -> Statement {
        let mut sql = self.entity.select_sql();
        sql.push_str(&self.where_sql());

        if !self.order_clauses.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_clauses.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) if offset > 0 => {
                sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
            }
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) if offset > 0 => {
                sql.push_str(&format!(" LIMIT -1 OFFSET {offset}"));
            }
            _ => {}
        }

        Statement {
            sql,
            values: self.values.clone(),
        }
    }

    /// The count statement: same predicates, no ordering or pagination.
    pub fn build_count(&self) -> Statement {
        Statement {
            sql: format!("SELECT COUNT(*) FROM {}{}", self.entity.table(), self.where_sql()),
            values: self.values.clone(),
        }
    }

    /// DELETE every row matching the predicates.
    pub fn build_delete(&self) -> Statement {
        Statement {
            sql: format!("DELETE FROM {}{}", self.entity.table(), self.where_sql()),
            values: self.values.clone(),
        }
    }

    /// UPDATE every row matching the predicates, returning the updated rows.
    pub fn build_update(&self, assignments: Vec<(String, SqlValue)>) -> Statement {
        let sets: Vec<String> = assignments.iter().map(|(c, _)| format!("{c} = ?")).collect();
        let mut values: Vec<SqlValue> = assignments.into_iter().map(|(_, v)| v).collect();
        values.extend(self.values.iter().cloned());
        Statement {
            sql: format!(
                "UPDATE {} SET {}{} RETURNING {}",
                self.entity.table(),
                sets.join(", "),
                self.where_sql(),
                self.entity.column_list()
            ),
            values,
        }
    }
}

/// INSERT one row, returning it as stored.
pub fn insert_statement(entity: &EntityDescriptor, columns: Vec<(String, SqlValue)>) -> Statement {
    if columns.is_empty() {
        return Statement::new(format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            entity.table(),
            entity.column_list()
        ));
    }

    let names: Vec<&str> = columns.iter().map(|(c, _)| c.as_str()).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        entity.table(),
        names.join(", "),
        placeholders(columns.len()),
        entity.column_list()
    );
    Statement {
        sql,
        values: columns.into_iter().map(|(_, v)| v).collect(),
    }
}

/// SQL predicate and bound values for `filter` on `field`.
fn predicate(field: &FieldDef, filter: &Filter) -> Option<(String, Vec<SqlValue>)> {
    use FilterOperator::*;

    let col = field.name.as_str();
    match (filter.operator(), filter.value()) {
        (Eq | Ne | Lt | Lte | Gt | Gte, FilterValue::Scalar(raw)) => {
            let op = match filter.operator() {
                Eq => "=",
                Ne => "<>",
                Lt => "<",
                Lte => "<=",
                Gt => ">",
                _ => ">=",
            };
            let value = coerce(field.field_type, raw)?;
            Some((format!("{col} {op} ?"), vec![value]))
        }

        (In | NotIn, FilterValue::List(items)) => {
            let values: Vec<SqlValue> = items
                .iter()
                .filter_map(|item| coerce(field.field_type, item))
                .collect();
            if values.is_empty() {
                return None;
            }
            let not = if filter.operator() == NotIn { "NOT " } else { "" };
            Some((format!("{col} {not}IN ({})", placeholders(values.len())), values))
        }

        (Between | NotBetween, FilterValue::Range(low, high)) => {
            let low = coerce(field.field_type, low)?;
            let high = coerce(field.field_type, high)?;
            let not = if filter.operator() == NotBetween { "NOT " } else { "" };
            Some((format!("{col} {not}BETWEEN ? AND ?"), vec![low, high]))
        }

        (IsNull | IsNotNull, FilterValue::Flag(flag)) => {
            let wants_null = *flag == (filter.operator() == IsNull);
            let clause = if wants_null {
                format!("{col} IS NULL")
            } else {
                format!("{col} IS NOT NULL")
            };
            Some((clause, Vec::new()))
        }

        (op, FilterValue::Scalar(raw)) => text_predicate(col, op, raw),

        _ => None,
    }
}

/// Substring / prefix / suffix predicates. The plain forms use LIKE, which is
/// case-insensitive for ASCII in SQLite; the `s` forms compare bytes exactly.
fn text_predicate(col: &str, op: FilterOperator, raw: &str) -> Option<(String, Vec<SqlValue>)> {
    use FilterOperator::*;

    if raw.is_empty() {
        return None;
    }
    let escaped = escape_like(raw);
    let like = |not: bool, pattern: String| {
        let not = if not { "NOT " } else { "" };
        Some((
            format!("{col} {not}LIKE ? ESCAPE '\\'"),
            vec![SqlValue::String(pattern)],
        ))
    };
    let text = || SqlValue::String(raw.to_string());

    match op {
        Contains => like(false, format!("%{escaped}%")),
        NotContains => like(true, format!("%{escaped}%")),
        StartsWith => like(false, format!("{escaped}%")),
        NotStartsWith => like(true, format!("{escaped}%")),
        EndsWith => like(false, format!("%{escaped}")),
        NotEndsWith => like(true, format!("%{escaped}")),
        ContainsCaseSensitive => Some((format!("instr({col}, ?) > 0"), vec![text()])),
        NotContainsCaseSensitive => Some((format!("instr({col}, ?) = 0"), vec![text()])),
        StartsWithCaseSensitive => Some((format!("instr({col}, ?) = 1"), vec![text()])),
        NotStartsWithCaseSensitive => Some((format!("instr({col}, ?) <> 1"), vec![text()])),
        EndsWithCaseSensitive => Some((
            format!("substr({col}, -length(?)) = ?"),
            vec![text(), text()],
        )),
        NotEndsWithCaseSensitive => Some((
            format!("substr({col}, -length(?)) <> ?"),
            vec![text(), text()],
        )),
        _ => None,
    }
}

/// Convert a wire value to the field's storage type.
pub(crate) fn coerce(field_type: FieldType, raw: &str) -> Option<SqlValue> {
    let trimmed = raw.trim();
    match field_type {
        FieldType::Text | FieldType::Json => Some(SqlValue::String(raw.to_string())),
        FieldType::Integer => trimmed
            .parse::<i64>()
            .map(SqlValue::Int)
            .or_else(|_| trimmed.parse::<f64>().map(SqlValue::Float))
            .ok(),
        FieldType::Real => trimmed.parse::<f64>().ok().map(SqlValue::Float),
        FieldType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(SqlValue::Bool(true)),
            "false" | "0" | "no" | "off" => Some(SqlValue::Bool(false)),
            _ => None,
        },
    }
}

/// Escape LIKE wildcards so user input matches literally (escape char `\`)
pub(crate) fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
