//! Descriptor-driven ORM layer
//!
//! - `descriptor` - static metadata per entity (fields, capabilities, relations)
//! - `compiler` - transport parameters to [`QueryOptions`]
//! - `builder` - [`QueryOptions`] to parameterised SQL
//! - `repository` - generic CRUD over any [`Entity`]
//! - `owned` - ownership-scoping decorator over a repository

pub mod builder;
pub mod compiler;
pub mod descriptor;
pub mod filters;
pub mod options;
pub mod owned;
pub mod params;
pub mod record;
pub mod relations;
pub mod repository;
pub mod traits;

pub use builder::{EntityQuery, Statement};
pub use compiler::{CompilerSettings, QueryCompiler};
pub use descriptor::{
    DescriptorBuilder, DescriptorFn, EntityDescriptor, FieldDef, FieldType, JoinTable, RelationDef,
    RelationKind, SortSpec,
};
pub use filters::{Filter, FilterOperator, FilterValue, ValueShape};
pub use options::{DEFAULT_PER_PAGE, MAX_PER_PAGE, QueryOptions};
pub use owned::{ContextOwner, OwnedRepository, OwnerContext, OwnerId, OwnerResolver, OwnershipSettings};
pub use params::QueryParams;
pub use record::Record;
pub use repository::{Page, Patch, Predicates, RawQuery, Repository, Update};
pub use traits::{Entity, SortDirection, SqlValue, descriptor_of};
