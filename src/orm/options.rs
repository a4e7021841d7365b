//! Normalized query options
//!
//! The compiled, validated form of a list/count request. Values are immutable:
//! every adjustment returns a new `QueryOptions`.

use std::sync::Arc;

use super::descriptor::{EntityDescriptor, SortSpec};
use super::filters::Filter;

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone)]
pub struct QueryOptions {
    entity: Arc<EntityDescriptor>,
    page: u32,
    per_page: u32,
    max_per_page: u32,
    disable_pagination: bool,
    search: String,
    filters: Vec<Filter>,
    sort: Vec<SortSpec>,
    pagination_disabled_for_count: bool,
}

impl QueryOptions {
    /// Defaults for `entity`: first page, default page size, descriptor's default sort.
    pub fn new(entity: Arc<EntityDescriptor>) -> Self {
        let sort = entity.default_sort().cloned().into_iter().collect();
        Self {
            entity,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            max_per_page: MAX_PER_PAGE,
            disable_pagination: false,
            search: String::new(),
            filters: Vec::new(),
            sort,
            pagination_disabled_for_count: false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        entity: Arc<EntityDescriptor>,
        page: u32,
        per_page: u32,
        max_per_page: u32,
        disable_pagination: bool,
        search: String,
        filters: Vec<Filter>,
        sort: Vec<SortSpec>,
    ) -> Self {
        let max_per_page = max_per_page.max(1);
        Self {
            entity,
            page: page.max(1),
            per_page: per_page.clamp(1, max_per_page),
            max_per_page,
            disable_pagination,
            search,
            filters,
            sort,
            pagination_disabled_for_count: false,
        }
    }

    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn disable_pagination(&self) -> bool {
        self.disable_pagination
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn sort(&self) -> &[SortSpec] {
        &self.sort
    }

    pub fn pagination_disabled_for_count(&self) -> bool {
        self.pagination_disabled_for_count
    }

    /// Rows skipped before the current page
    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.per_page as u64
    }

    pub fn limit(&self) -> u64 {
        self.per_page as u64
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, self.max_per_page);
        self
    }

    pub fn without_pagination(mut self) -> Self {
        self.disable_pagination = true;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into().trim().to_string();
        self
    }

    /// Append a filter. Duplicate filters on one field are kept and ANDed.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortSpec>) -> Self {
        self.sort = sort;
        self
    }

    /// The variant used for counting: same predicates, no sort, no pagination.
    pub fn for_count(&self) -> Self {
        Self {
            sort: Vec::new(),
            disable_pagination: true,
            pagination_disabled_for_count: true,
            ..self.clone()
        }
    }
}
