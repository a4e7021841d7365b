//! Generic, ownership-aware repository layer over SQLite.
//!
//! Entities describe themselves once (usually through `#[derive(Entity)]`),
//! after which a single [`Repository`] serves CRUD, filtered and paginated
//! listing, bulk writes and eager relation loading for any of them.
//! [`OwnedRepository`] scopes every operation to the caller's owner identity,
//! and [`QueryCompiler`] turns loosely formatted request parameters into
//! validated [`QueryOptions`].
//!
//! ```rust,ignore
//! use repokit::{Database, Entity, OwnerContext, QueryParams};
//!
//! #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Entity)]
//! #[entity(table = "notes", owner = "user_id", default_sort = "title")]
//! struct Note {
//!     id: Option<i64>,
//!     #[filterable]
//!     #[sortable]
//!     #[searchable]
//!     title: String,
//!     user_id: Option<String>,
//! }
//!
//! let db = Database::in_memory().await?;
//! db.sync::<Note>().await?;
//! let notes = db.repository::<Note>()?.owned(repokit::ContextOwner)?;
//!
//! let ctx = OwnerContext::new("u1");
//! let page = notes.list(&ctx, &notes.inner().compile(&QueryParams::parse("q=todo"))).await?;
//! ```

extern crate self as repokit;

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod orm;

pub use config::Config;
pub use db::{Database, Executor};
pub use error::{RepoError, Result};
pub use orm::{
    CompilerSettings, ContextOwner, DescriptorBuilder, Entity, EntityDescriptor, FieldDef, FieldType,
    Filter, FilterOperator, FilterValue, JoinTable, OwnedRepository, OwnerContext, OwnerId,
    OwnerResolver, OwnershipSettings, Page, Patch, Predicates, QueryCompiler, QueryOptions,
    QueryParams, RawQuery, Record, RelationDef, RelationKind, Repository, SortDirection, SortSpec,
    SqlValue, Update,
};
pub use repokit_macros::Entity;
