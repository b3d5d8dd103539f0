//! Error taxonomy for association operations.

use thiserror::Error;

use crate::models::{AssociationId, ObjectId, TagId};

/// A malformed association rejected before any write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("scope cannot be empty")]
    EmptyScope,

    #[error("object id must be positive, got {0}")]
    InvalidObjectId(ObjectId),

    #[error("tag id must be positive, got {0}")]
    InvalidTagId(TagId),
}

/// Errors produced by the association store and service.
#[derive(Debug, Error)]
pub enum TagError {
    /// Association fields failed validation.
    #[error("Invalid association: {0}")]
    Validation(#[from] ValidationError),

    /// A merge or copy was requested with a missing, non-positive, or identical tag pair.
    #[error("Precondition failed: {reason}")]
    Precondition { reason: String },

    /// A single row failed to persist during a batch operation.
    ///
    /// Only ever handed to an `ErrorReporter`; batches keep going.
    #[error("Failed to persist association {association}: {source}")]
    Persistence {
        association: AssociationId,
        #[source]
        source: rusqlite::Error,
    },

    /// Underlying SQLite errors.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Audit payload (de)serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TagError {
    pub(crate) fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition {
            reason: reason.into(),
        }
    }

    /// Returns true for errors caused by caller input rather than the system.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Precondition { .. })
    }
}

/// Result type for association operations.
pub type TagResult<T> = Result<T, TagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_user_errors() {
        let err = TagError::from(ValidationError::EmptyScope);
        assert!(err.is_user_error());
        assert_eq!(err.to_string(), "Invalid association: scope cannot be empty");
    }

    #[test]
    fn database_errors_are_not_user_errors() {
        let err = TagError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(!err.is_user_error());
    }
}
