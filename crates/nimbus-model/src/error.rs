//! Error types shared across the model.

use thiserror::Error;

use crate::activity::Activity;

/// Errors raised by model-level validation.
#[derive(Debug, Error)]
pub enum ModelError {
    /// An activity could not be started because a conflicting one is
    /// already registered.
    #[error("resource is busy with activity '{0}'")]
    ActivityBusy(Activity),

    /// A field that must be unique already holds the given value.
    #[error("non-unique field '{field}': '{value}' already exists")]
    NonUniqueField {
        /// Name of the offending field.
        field: String,
        /// The duplicate value.
        value: String,
    },

    /// Job args were missing a required parameter or held the wrong type.
    #[error("invalid job args: {0}")]
    InvalidArgs(String),
}

impl ModelError {
    /// Creates a non-unique-field error.
    #[must_use]
    pub fn non_unique(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::NonUniqueField {
            field: field.into(),
            value: value.into(),
        }
    }
}
