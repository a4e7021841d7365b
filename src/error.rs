//! Error taxonomy for the repository layer
//!
//! Every failure the repository or the ownership decorator can report maps to
//! exactly one variant, so transports can translate them to status codes
//! without inspecting messages.

use thiserror::Error;

/// Errors raised by entity registration, repositories and the ownership decorator.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Invalid entity registration (unknown id/owner field, bad identifier, ...)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No row matched the id or predicate
    #[error("{entity} not found{}", id.as_deref().map(|id| format!(": {id}")).unwrap_or_default())]
    NotFound {
        entity: String,
        id: Option<String>,
    },

    /// Input shape does not fit the operation (non-list bulk input, bad field value, ...)
    #[error("invalid type: {0}")]
    InvalidType(String),

    /// Predicate referenced a field the entity does not declare
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// Ownership is enforced but no owner could be resolved from the context
    #[error("owner id not found in context")]
    OwnerIdNotFound,

    /// The record exists but belongs to another owner
    #[error("{entity} {id} belongs to another owner")]
    OwnerMismatch { entity: String, id: String },

    /// A transaction-bound repository was used after its transaction ended
    #[error("transaction already closed")]
    TransactionClosed,

    /// Passthrough from the underlying store
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

impl RepoError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: Some(id.to_string()),
        }
    }

    pub fn not_found_by_predicate(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: None,
        }
    }

    pub fn owner_mismatch(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::OwnerMismatch {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_owner_mismatch(&self) -> bool {
        matches!(self, Self::OwnerMismatch { .. })
    }

    /// HTTP-equivalent status an upstream transport should map this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::OwnerMismatch { .. } => 403,
            Self::OwnerIdNotFound => 401,
            Self::InvalidType(_) | Self::UnknownField(_) => 400,
            Self::Configuration(_) | Self::TransactionClosed | Self::Storage(_) => 500,
        }
    }
}

pub type Result<T, E = RepoError> = std::result::Result<T, E>;
