//! Query option compiler
//!
//! Turns an untrusted parameter bag into [`QueryOptions`]. Several wire
//! conventions are accepted side by side:
//!
//! | Concept        | Accepted keys                                                        |
//! |----------------|----------------------------------------------------------------------|
//! | page           | `page`, `current`                                                    |
//! | page size      | `per_page`, `pageSize`                                               |
//! | sort           | `sort`+`order` (comma lists), `sort[i][field]`+`sort[i][order]`,     |
//! |                | `sort[field]`+`sort[order]`, `sort[<name>][order]`, `sort[<name>]`   |
//! | filter         | `field=value`, `field_<op>=value`, `field_operator=<op>`             |
//! | indexed filter | `filters[i][field]`, `filters[i][operator]`, `filters[i][value]`     |
//! | free text      | `q`                                                                  |
//! | no pagination  | `pagination=false\|off\|none`, `pagination[mode]=off`                |
//!
//! The compiler never fails: malformed fragments are dropped and invalid
//! pagination values fall back to defaults.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use super::descriptor::{EntityDescriptor, SortSpec};
use super::filters::{Filter, FilterOperator, ValueShape};
use super::options::{DEFAULT_PER_PAGE, MAX_PER_PAGE, QueryOptions};
use super::params::QueryParams;
use super::traits::SortDirection;
use crate::config::Config;

static INDEXED_FILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^filters\[(\d+)\]\[(field|operator|value)\]$").expect("filter key pattern is valid")
});

static INDEXED_SORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^sort\[(\d+)\]\[(field|order)\]$").expect("sort key pattern is valid")
});

static NAMED_SORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^sort\[([A-Za-z_][A-Za-z0-9_]*)\](?:\[order\])?$").expect("sort key pattern is valid")
});

const PAGE_KEYS: [&str; 2] = ["page", "current"];
const PER_PAGE_KEYS: [&str; 2] = ["per_page", "pageSize"];
const SEARCH_KEY: &str = "q";
const OPERATOR_SUFFIX: &str = "_operator";

/// Keys that are never interpreted as bare `field=value` filters
const RESERVED_KEYS: [&str; 8] = [
    "page", "current", "per_page", "pageSize", "sort", "order", "q", "pagination",
];

/// Compiler defaults and allow-lists.
#[derive(Debug, Clone)]
pub struct CompilerSettings {
    pub default_per_page: u32,
    pub max_per_page: u32,
    /// Operators accepted in the `field_<op>` suffix convention
    pub operators: Vec<FilterOperator>,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            default_per_page: DEFAULT_PER_PAGE,
            max_per_page: MAX_PER_PAGE,
            operators: FilterOperator::ALL.to_vec(),
        }
    }
}

impl From<&Config> for CompilerSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_per_page: config.default_page_size,
            max_per_page: config.max_page_size,
            operators: config.filter_operators.clone(),
        }
    }
}

/// Stateless compiler from [`QueryParams`] to [`QueryOptions`].
#[derive(Debug, Clone, Default)]
pub struct QueryCompiler {
    settings: CompilerSettings,
}

#[derive(Default)]
struct IndexedParts<'a> {
    field: Option<&'a str>,
    operator: Option<&'a str>,
    value: Option<&'a str>,
}

impl QueryCompiler {
    pub fn new(settings: CompilerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Compile `params` against `entity`.
    pub fn compile(&self, params: &QueryParams, entity: &Arc<EntityDescriptor>) -> QueryOptions {
        let max_per_page = self.settings.max_per_page.max(1);
        let page = first_positive(params, &PAGE_KEYS).unwrap_or(1);
        let per_page = first_positive(params, &PER_PAGE_KEYS)
            .unwrap_or(self.settings.default_per_page)
            .clamp(1, max_per_page);

        let search = params
            .first_non_empty(SEARCH_KEY)
            .unwrap_or_default()
            .to_string();

        let mut filters = self.simple_filters(params, entity);
        filters.extend(self.indexed_filters(params, entity));

        let mut sort = self.sort(params, entity);
        if sort.is_empty() {
            sort.extend(entity.default_sort().cloned());
        }

        QueryOptions::assemble(
            Arc::clone(entity),
            page,
            per_page,
            max_per_page,
            pagination_disabled(params),
            search,
            filters,
            sort,
        )
    }

    fn allows(&self, operator: FilterOperator) -> bool {
        self.settings.operators.contains(&operator)
    }

    /// Operator named by a wire token, or `Eq` when unknown or not allowed
    fn operator_or_eq(&self, token: &str) -> FilterOperator {
        match FilterOperator::parse(token) {
            Some(op) if self.allows(op) => op,
            _ => FilterOperator::Eq,
        }
    }

    /// `field=value`, `field_<op>=value` and `field_operator=<op>`
    fn simple_filters(&self, params: &QueryParams, entity: &EntityDescriptor) -> Vec<Filter> {
        let overrides: HashMap<&str, FilterOperator> = params
            .iter()
            .filter_map(|(key, value)| {
                let field = key.strip_suffix(OPERATOR_SUFFIX)?;
                entity
                    .is_filterable(field)
                    .then(|| (field, self.operator_or_eq(value)))
            })
            .collect();

        let mut filters = Vec::new();
        for (key, value) in params.iter() {
            if is_reserved(key) {
                continue;
            }

            if entity.is_filterable(key) {
                let operator = overrides.get(key).copied().unwrap_or(FilterOperator::Eq);
                if value.is_empty() && operator.value_shape() != ValueShape::Flag {
                    continue;
                }
                push_filter(&mut filters, key, operator, value);
                continue;
            }

            if key
                .strip_suffix(OPERATOR_SUFFIX)
                .is_some_and(|field| entity.is_filterable(field))
            {
                continue;
            }

            match key.rsplit_once('_') {
                Some((field, token)) if entity.is_filterable(field) => {
                    match FilterOperator::parse(token) {
                        Some(op) if self.allows(op) => push_filter(&mut filters, field, op, value),
                        _ => warn!(key, "Dropping filter with unknown or disallowed operator"),
                    }
                }
                _ => warn!(key, "Dropping parameter for unknown or non-filterable field"),
            }
        }
        filters
    }

    /// `filters[i][field]=..&filters[i][operator]=..&filters[i][value]=..`
    fn indexed_filters(&self, params: &QueryParams, entity: &EntityDescriptor) -> Vec<Filter> {
        let mut groups: BTreeMap<u32, IndexedParts<'_>> = BTreeMap::new();
        for (key, value) in params.iter() {
            let Some(caps) = INDEXED_FILTER.captures(key) else {
                continue;
            };
            let Ok(index) = caps[1].parse::<u32>() else {
                continue;
            };
            let parts = groups.entry(index).or_default();
            let slot = match &caps[2] {
                "field" => &mut parts.field,
                "operator" => &mut parts.operator,
                _ => &mut parts.value,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }

        let mut filters = Vec::new();
        for (index, parts) in groups {
            let Some(field) = parts.field.map(str::trim).filter(|f| entity.is_filterable(f)) else {
                warn!(index, "Dropping indexed filter for unknown or non-filterable field");
                continue;
            };
            let operator = parts.operator.map_or(FilterOperator::Eq, |t| self.operator_or_eq(t));
            match parts.value {
                Some(value) => push_filter(&mut filters, field, operator, value),
                None if operator.value_shape() == ValueShape::Flag => {
                    push_filter(&mut filters, field, operator, "")
                }
                None => warn!(index, field, "Dropping indexed filter without value"),
            }
        }
        filters
    }

    fn sort(&self, params: &QueryParams, entity: &EntityDescriptor) -> Vec<SortSpec> {
        let mut requested: Vec<(String, Option<String>)> = Vec::new();

        // sort=a,b&order=asc,desc
        if let Some(fields) = params.first_non_empty("sort") {
            let orders: Vec<&str> = params
                .first_non_empty("order")
                .map(|o| o.split(',').map(str::trim).collect())
                .unwrap_or_default();
            for (i, field) in fields.split(',').map(str::trim).enumerate() {
                requested.push((field.to_string(), orders.get(i).map(|o| o.to_string())));
            }
        }

        // sort[0][field]=a&sort[0][order]=desc
        let mut indexed: BTreeMap<u32, (Option<&str>, Option<&str>)> = BTreeMap::new();
        for (key, value) in params.iter() {
            let Some(caps) = INDEXED_SORT.captures(key) else {
                continue;
            };
            let Ok(index) = caps[1].parse::<u32>() else {
                continue;
            };
            let entry = indexed.entry(index).or_default();
            match &caps[2] {
                "field" => entry.0 = entry.0.or(Some(value)),
                _ => entry.1 = entry.1.or(Some(value)),
            }
        }
        for (field, order) in indexed.into_values() {
            if let Some(field) = field {
                requested.push((field.trim().to_string(), order.map(str::to_string)));
            }
        }

        // sort[field]=a&sort[order]=desc
        if let Some(field) = params.first_non_empty("sort[field]") {
            requested.push((
                field.to_string(),
                params.first_non_empty("sort[order]").map(str::to_string),
            ));
        }

        // sort[a][order]=desc, sort[a]=desc
        for (key, value) in params.iter() {
            if let Some(caps) = NAMED_SORT.captures(key) {
                let name = &caps[1];
                if name != "field" && name != "order" {
                    requested.push((name.to_string(), Some(value.to_string())));
                }
            }
        }

        let mut seen = HashSet::new();
        let mut sort = Vec::new();
        for (field, order) in requested {
            if field.is_empty() {
                continue;
            }
            if !entity.is_sortable(&field) {
                warn!(field = %field, "Ignoring sort on unknown or non-sortable field");
                continue;
            }
            if !seen.insert(field.clone()) {
                continue;
            }
            let direction = order
                .as_deref()
                .and_then(SortDirection::parse)
                .unwrap_or_default();
            sort.push(SortSpec { field, direction });
        }
        sort
    }
}

fn push_filter(filters: &mut Vec<Filter>, field: &str, operator: FilterOperator, raw: &str) {
    match Filter::parse(field, operator, raw) {
        Some(filter) => filters.push(filter),
        None => warn!(field, %operator, "Dropping filter value that does not fit its operator"),
    }
}

fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
        || key.starts_with("sort[")
        || key.starts_with("filters[")
        || key.starts_with("pagination[")
}

/// First strictly positive integer among `keys`, in precedence order
fn first_positive(params: &QueryParams, keys: &[&str]) -> Option<u32> {
    keys.iter()
        .flat_map(|key| params.get_all(key))
        .filter_map(|value| value.trim().parse::<u32>().ok())
        .find(|n| *n > 0)
}

fn pagination_disabled(params: &QueryParams) -> bool {
    let off = |v: &str| matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "off" | "none" | "0");
    params.get_all("pagination").any(off) || params.get_all("pagination[mode]").any(off)
}
