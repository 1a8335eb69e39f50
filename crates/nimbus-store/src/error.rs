//! Error types for repository operations.

use thiserror::Error;

use nimbus_model::ModelError;

/// Result alias for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the repositories.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with the given id.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A unique field already holds the given value.
    #[error("non-unique field '{field}': '{value}' already exists")]
    NonUniqueField {
        /// The unique field.
        field: String,
        /// The duplicate value.
        value: String,
    },

    /// An activity could not be started on the resource.
    #[error("resource {id} is busy: {source}")]
    ActivityBusy {
        /// Resource id.
        id: String,
        /// The underlying constraint violation.
        source: ModelError,
    },

    /// A filter held an invalid name regex.
    #[error("invalid filter pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl StoreError {
    pub(crate) fn non_unique(field: &str, value: impl Into<String>) -> Self {
        Self::NonUniqueField {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub(crate) fn busy(id: impl Into<String>, source: ModelError) -> Self {
        Self::ActivityBusy {
            id: id.into(),
            source,
        }
    }

    /// True if this is the activity-busy case, which maps to HTTP 423 at
    /// the API layer.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::ActivityBusy { .. })
    }

    /// True if this is the not-found case. Confirmers treat not-found as
    /// "already done".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
